//! Per-connection event stream loop.
//!
//! Relays a session's queued events as JSON frames, emits heartbeats while
//! idle, and tears the session down exactly once on any exit path,
//! including the consumer dropping the stream mid-flight.

use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use docrelay_shared::{Event, SessionId};

use crate::session::{SessionRegistry, Subscription};

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A cancel request was observed.
    Cancelled,
    /// The peer went away or the session was destroyed elsewhere.
    Closed,
    /// Producing or consuming events failed.
    Errored,
}

/// Destroys the session when dropped.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    end: StreamEnd,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.destroy(&self.id) {
            info!(session_id = %self.id, end = ?self.end, "session torn down");
        }
    }
}

/// Serialize an event into one frame payload.
fn encode(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

fn error_frame(message: String) -> String {
    serde_json::json!({ "type": "error", "message": message }).to_string()
}

/// Drive one session's connection loop.
///
/// The first frame is the `connection established` greeting carrying the
/// session id. Afterwards queued events are relayed verbatim (errors are not
/// terminal) and a heartbeat is emitted after every idle window.
pub fn event_stream(
    registry: Arc<SessionRegistry>,
    subscription: Subscription,
) -> impl Stream<Item = String> + Send + 'static {
    let Subscription {
        id,
        mut events,
        cancel,
        closed,
    } = subscription;
    let idle = registry.limits().idle_timeout;
    let mut guard = SessionGuard {
        registry,
        id: id.clone(),
        end: StreamEnd::Closed,
    };

    stream! {
        match encode(&Event::connected(&id)) {
            Ok(frame) => yield frame,
            Err(e) => {
                guard.end = StreamEnd::Errored;
                yield error_frame(e.to_string());
                drop(guard);
                return;
            }
        }

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = closed.cancelled() => Wake::Closed,
                next = timeout(idle, events.recv()) => match next {
                    Ok(Some(event)) => Wake::Event(event),
                    Ok(None) => Wake::Drained,
                    Err(_) => Wake::Event(Event::Heartbeat),
                },
            };

            let event = match wake {
                Wake::Event(event) => event,
                Wake::Cancelled => {
                    guard.end = StreamEnd::Cancelled;
                    if let Ok(frame) = encode(&Event::cancelled()) {
                        yield frame;
                    }
                    break;
                }
                Wake::Closed => break,
                Wake::Drained => {
                    guard.end = StreamEnd::Errored;
                    warn!(session_id = %id, "event queue closed unexpectedly");
                    yield error_frame("event queue closed".into());
                    break;
                }
            };

            if !guard.registry.contains(&id) {
                debug!(session_id = %id, "session gone, ending stream");
                break;
            }

            match encode(&event) {
                Ok(frame) => yield frame,
                Err(e) => {
                    guard.end = StreamEnd::Errored;
                    warn!(session_id = %id, error = %e, "failed to encode event");
                    yield error_frame(e.to_string());
                    break;
                }
            }
        }

        drop(guard);
    }
}

/// What woke the loop.
enum Wake {
    Event(Event),
    Cancelled,
    Closed,
    Drained,
}
