use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use log::{debug, info};

use crate::config::{Direction, ForkConfig};
use crate::connect::ConnectionManager;
use crate::error::{ControlError, StartError};
use crate::pump;
use crate::registry::SessionRegistry;
use crate::session::{
    EndReason, Session, SessionEvent, SessionHandle, SessionId, SessionState,
};
use crate::source::{FrameSource, TapOptions};
use crate::transport::Connector;

/// Read-only view of one registered session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub endpoint: String,
    pub state: SessionState,
}

/// Start forking audio from `tap` to the configured endpoint.
///
/// The initial connection is made on the caller's thread with the full
/// retry policy, so an unreachable endpoint reports
/// [`ConnectError::Exhausted`](crate::error::ConnectError::Exhausted)
/// right here and nothing is registered. On success the session is
/// registered, its pump thread is detached, and the returned id stays
/// valid until the fork ends or is stopped.
pub fn start(
    registry: &Arc<SessionRegistry>,
    tap: Arc<dyn FrameSource>,
    connector: Arc<dyn Connector>,
    config: ForkConfig,
    events: Option<Sender<SessionEvent>>,
) -> Result<SessionId, StartError> {
    let config = config.validated()?;
    let id = SessionId::new();

    tap.set_volume(config.volume.read, config.volume.write);
    tap.attach(TapOptions {
        bridged_only: config.bridged_only,
        sync_silence: config.sync_silence,
    })?;

    let manager = ConnectionManager::new(
        connector,
        config.endpoint.clone(),
        config.tls.clone(),
        config.reconnect,
        id.to_string(),
    );

    info!(
        "<{}> ({}) connecting to {}",
        id, config.direction, config.endpoint
    );
    let (link, attempts) = match manager.reconnect() {
        Ok(connected) => connected,
        Err(e) => {
            // The session never started; leave nothing behind.
            tap.detach();
            if let Some(events) = &events {
                let _ = events.send(SessionEvent::Terminated {
                    frames_sent: 0,
                    reason: EndReason::NeverConnected,
                });
            }
            return Err(e.into());
        }
    };

    let handle = SessionHandle::new(
        id,
        config.endpoint.clone(),
        Arc::clone(&tap),
        config.tone_id.clone(),
    );
    registry.register(Arc::clone(&handle));
    handle.set_state(SessionState::Running);
    if let Some(events) = &events {
        let _ = events.send(SessionEvent::Connected { attempts });
    }

    let rollback_tap = Arc::clone(&tap);
    let session = Session {
        id,
        handle,
        tap,
        manager,
        link,
        direction: config.direction,
        post_command: config.post_command.clone(),
        registry: Arc::clone(registry),
        events,
    };

    let spawned = thread::Builder::new()
        .name(format!("audiofork-{}", id))
        .spawn(move || {
            let outcome = pump::run(session);
            debug!(
                "<{}> pump thread exiting: {} frames sent ({:?})",
                id, outcome.frames_sent, outcome.reason
            );
        });

    if let Err(e) = spawned {
        if let Some(handle) = registry.remove(&id) {
            handle.acknowledge_destruction();
        }
        rollback_tap.detach();
        return Err(StartError::Spawn(e));
    }

    Ok(id)
}

/// Stop a session by id, or any session on this registry when `id` is
/// `None`. Wakes a pump parked on the frame wait; the pump finishes any
/// write in flight and then tears the session down. A second stop on the
/// same id reports `NotFound`.
pub fn stop(registry: &SessionRegistry, id: Option<&SessionId>) -> Result<(), ControlError> {
    let id = match id {
        Some(id) => *id,
        None => registry.any_id().ok_or(ControlError::NotFound)?,
    };
    let handle = registry.lookup(&id).ok_or(ControlError::NotFound)?;

    info!("<{}> stop requested", id);
    let tone = handle.begin_shutdown();
    if let Some(removed) = registry.remove(&id) {
        removed.acknowledge_destruction();
    }
    if let Some(tone) = tone {
        info!("<{}> releasing periodic tone {}", id, tone);
    }

    Ok(())
}

/// Mute or unmute one direction of a running fork.
pub fn mute(
    registry: &SessionRegistry,
    id: Option<&SessionId>,
    direction: Direction,
    mute: bool,
) -> Result<(), ControlError> {
    let id = match id {
        Some(id) => *id,
        None => registry.any_id().ok_or(ControlError::NotFound)?,
    };
    let handle = registry.lookup(&id).ok_or(ControlError::NotFound)?;
    let tap = handle.tap().ok_or(ControlError::NotFound)?;

    tap.set_mute(direction, mute);
    info!(
        "<{}> {} direction '{}'",
        id,
        if mute { "muted" } else { "unmuted" },
        direction
    );
    Ok(())
}

/// Read one attribute of a registered session. Currently only
/// `"endpoint"`, the configured remote endpoint string.
pub fn attribute(
    registry: &SessionRegistry,
    id: &SessionId,
    key: &str,
) -> Result<String, ControlError> {
    let handle = registry.lookup(id).ok_or(ControlError::NotFound)?;
    match key {
        "endpoint" => Ok(handle.endpoint()),
        other => Err(ControlError::UnknownAttribute(other.to_string())),
    }
}

/// List the registered sessions, most useful for diagnostics surfaces.
pub fn sessions(registry: &SessionRegistry) -> Vec<SessionInfo> {
    registry
        .snapshot()
        .into_iter()
        .map(|handle| SessionInfo {
            id: handle.id(),
            endpoint: handle.endpoint(),
            state: handle.state(),
        })
        .collect()
}
