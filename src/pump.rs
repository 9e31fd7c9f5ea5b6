use log::{debug, error, info, warn};

use crate::session::{EndReason, PumpOutcome, Session, SessionEvent, SessionState};
use crate::source::{SourceStatus, SAMPLES_PER_FRAME};
use crate::transport::CloseReason;

/// The session's streaming loop, run on its dedicated thread for the
/// session's entire lifetime. Drains the tap, forwards frames in arrival
/// order, and falls back to the connection manager when a write fails.
pub(crate) fn run(mut session: Session) -> PumpOutcome {
    let mut frames_sent: u64 = 0;
    let mut reason = EndReason::SourceEnded;

    info!(
        "<{}> ({}) begin forking to {}",
        session.id,
        session.direction,
        session.manager.endpoint()
    );

    'stream: while session.tap.status() == SourceStatus::Running {
        let frames = session
            .tap
            .read_frames(SAMPLES_PER_FRAME, session.direction);

        if frames.is_empty() {
            session.tap.wait();
            if session.tap.status() != SourceStatus::Running {
                debug!(
                    "<{}> ({}) frame source is no longer running",
                    session.id, session.direction
                );
                break;
            }
            continue;
        }

        for frame in frames {
            let payload = frame.payload();

            if let Err(e) = session.link.write_binary(&payload) {
                warn!(
                    "<{}> ({}) could not write to websocket: {}. Reconnecting...",
                    session.id, session.direction, e
                );
                session.handle.set_state(SessionState::Reconnecting);
                session.link.close(CloseReason::Failure);

                match session.manager.reconnect() {
                    Ok((link, attempts)) => {
                        session.link = link;
                        session.handle.set_state(SessionState::Running);
                        session.notify(SessionEvent::Reconnected { attempts });

                        // Re-send only the frame that never made it; frames
                        // already written are never retried.
                        if let Err(e) = session.link.write_binary(&payload) {
                            error!(
                                "<{}> ({}) could not re-write to websocket: {}. Complete failure.",
                                session.id, session.direction, e
                            );
                            session.tap.mark_shutdown();
                            reason = EndReason::LinkFailed;
                            break 'stream;
                        }
                    }
                    Err(e) => {
                        error!(
                            "<{}> ({}) reconnection failed: {}",
                            session.id, session.direction, e
                        );
                        session.tap.mark_shutdown();
                        reason = EndReason::LinkFailed;
                        break 'stream;
                    }
                }
            }

            frames_sent += 1;
        }
    }

    session.teardown(frames_sent, reason)
}
