use thiserror::Error;

/// Errors raised while opening a link to the remote endpoint.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("websocket connect failed: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gave up connecting after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// A single binary write on an established link failed.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("websocket write failed: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("link is closed")]
    Closed,
}

/// Rejected configuration, reported before any session state is created.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid endpoint '{url}': {reason}")]
    Endpoint { url: String, reason: String },

    #[error("invalid reconnect policy: {0}")]
    Policy(String),
}

/// The frame source refused to attach.
#[derive(Error, Debug)]
#[error("audio tap attach failed: {0}")]
pub struct AttachError(pub String);

/// Errors returned by `start`. A failed start never leaves a session
/// registered.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("failed to spawn streaming thread: {0}")]
    Spawn(std::io::Error),
}

/// Errors returned by the stop/mute/attribute operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControlError {
    #[error("no matching session")]
    NotFound,

    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),
}
