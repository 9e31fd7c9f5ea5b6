use std::fmt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::Sender;
use log::{error, info};
use uuid::Uuid;

use crate::config::Direction;
use crate::connect::ConnectionManager;
use crate::registry::SessionRegistry;
use crate::source::FrameSource;
use crate::transport::{CloseReason, Link};

/// Process-unique identifier of one audio fork, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session lifecycle. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Running,
    Reconnecting,
    ShuttingDown,
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The frame source reported shutdown or end of stream.
    SourceEnded,
    /// A write failed and reconnection could not save the stream.
    LinkFailed,
    /// The initial connection never came up; no audio was ever sent.
    NeverConnected,
}

/// Notifications delivered on the optional observer channel. Collaborators
/// get these plus the logs; there is no finer-grained progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { attempts: u32 },
    Reconnected { attempts: u32 },
    Terminated { frames_sent: u64, reason: EndReason },
}

struct HandleState {
    tap: Option<Arc<dyn FrameSource>>,
    destruction_ok: bool,
    state: SessionState,
    endpoint: String,
    tone_id: Option<String>,
}

/// The one record shared between the pump thread and control threads:
/// a nullable tap binding, the session state, and the destruction
/// rendezvous. Everything behind a single mutex plus one condvar; the
/// lock is never held across network I/O.
pub struct SessionHandle {
    id: SessionId,
    inner: Mutex<HandleState>,
    destroyed: Condvar,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        endpoint: String,
        tap: Arc<dyn FrameSource>,
        tone_id: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(HandleState {
                tap: Some(tap),
                destruction_ok: false,
                state: SessionState::Connecting,
                endpoint,
                tone_id,
            }),
            destroyed: Condvar::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> String {
        self.inner.lock().unwrap().endpoint.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SessionState::Terminated {
            inner.state = state;
        }
    }

    pub(crate) fn tap(&self) -> Option<Arc<dyn FrameSource>> {
        self.inner.lock().unwrap().tap.clone()
    }

    /// External stop path: take the tap binding, mark it shutdown and wake
    /// the pump, all under the handle lock so no further external access
    /// can observe the binding. Returns the tone handle to release.
    pub(crate) fn begin_shutdown(&self) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Terminated {
            return None;
        }
        inner.state = SessionState::ShuttingDown;
        if let Some(tap) = inner.tap.take() {
            tap.mark_shutdown();
        }
        inner.tone_id.take()
    }

    /// Whichever side removed the registry entry marks the handle safe to
    /// free and wakes the pump's destruction wait.
    pub(crate) fn acknowledge_destruction(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.tap = None;
        inner.destruction_ok = true;
        self.destroyed.notify_all();
    }

    /// Pump-side rendezvous: block until destruction is acknowledged.
    pub(crate) fn wait_destruction(&self) {
        let mut inner = self.inner.lock().unwrap();
        while !inner.destruction_ok {
            inner = self.destroyed.wait(inner).unwrap();
        }
    }

    pub(crate) fn take_tone(&self) -> Option<String> {
        self.inner.lock().unwrap().tone_id.take()
    }
}

/// Final accounting handed back by the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOutcome {
    pub frames_sent: u64,
    pub reason: EndReason,
}

/// Everything the pump thread owns for one fork. Created by `start`,
/// moved into the pump thread, and dropped exactly once when the pump
/// returns.
pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) handle: Arc<SessionHandle>,
    pub(crate) tap: Arc<dyn FrameSource>,
    pub(crate) manager: ConnectionManager,
    pub(crate) link: Box<dyn Link>,
    pub(crate) direction: Direction,
    pub(crate) post_command: Option<String>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) events: Option<Sender<SessionEvent>>,
}

impl Session {
    pub(crate) fn notify(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Exactly-once teardown. Runs on the pump thread after its loop has
    /// exited; safe against a concurrent external stop.
    pub(crate) fn teardown(mut self, frames_sent: u64, reason: EndReason) -> PumpOutcome {
        self.handle.set_state(SessionState::ShuttingDown);

        let close_reason = match reason {
            EndReason::LinkFailed => CloseReason::Failure,
            _ => CloseReason::Done,
        };
        self.link.close(close_reason);

        self.tap.detach();

        // Atomic remove-if-present: when the external stop already removed
        // the entry it also acknowledged destruction, so exactly one side
        // does each.
        if let Some(handle) = self.registry.remove(&self.id) {
            handle.acknowledge_destruction();
        }
        self.handle.wait_destruction();

        if let Some(tone) = self.handle.take_tone() {
            info!("<{}> releasing periodic tone {}", self.id, tone);
        }

        if let Some(command) = self.post_command.take() {
            run_post_command(&self.id, &command);
        }

        self.handle.set_state(SessionState::Terminated);
        info!(
            "<{}> finished forking to {}. Frames sent = {}",
            self.id,
            self.manager.endpoint(),
            frames_sent
        );
        self.notify(SessionEvent::Terminated {
            frames_sent,
            reason,
        });

        PumpOutcome {
            frames_sent,
            reason,
        }
    }
}

/// Fire-and-forget post-completion command. Output is discarded; the
/// child is reaped on a detached thread so it never zombifies.
fn run_post_command(id: &SessionId, command: &str) {
    info!("<{}> executing post command [{}]", id, command);
    match Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(mut child) => {
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => error!("<{}> post command failed to start: {}", id, e),
    }
}
