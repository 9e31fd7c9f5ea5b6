//! Forks live call audio to a remote WebSocket endpoint.
//!
//! Each fork is one session: a dedicated pump thread drains an audio tap
//! and forwards the frames as binary WebSocket messages, reconnecting
//! with a bounded retry policy when the link drops. Sessions are looked
//! up by id through a [`SessionRegistry`] and controlled with
//! [`start`], [`stop`] and [`mute`]; teardown is safe against a stop
//! request racing the end of the audio stream.

pub mod config;
pub mod connect;
pub mod control;
pub mod error;
mod pump;
pub mod registry;
pub mod session;
pub mod source;
pub mod transport;

pub use config::{Direction, ForkConfig, ReconnectPolicy, TlsOptions, VolumeAdjust};
pub use control::{attribute, mute, sessions, start, stop, SessionInfo};
pub use error::{
    AttachError, ConfigError, ConnectError, ControlError, StartError, WriteError,
};
pub use registry::SessionRegistry;
pub use session::{
    EndReason, PumpOutcome, SessionEvent, SessionHandle, SessionId, SessionState,
};
pub use source::{
    AudioFrame, ChannelTap, FrameSource, SourceStatus, TapOptions, SAMPLES_PER_FRAME,
    SAMPLE_RATE,
};
pub use transport::{CloseReason, Connector, Link, WsConnector, WsLink};
