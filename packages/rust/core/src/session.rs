//! Live session registry.
//!
//! Each session owns a bounded event queue, a cancellation token set by
//! cancel requests, and a `closed` token fired on teardown. The map is the
//! only shared mutable state; every access goes through [`SessionRegistry`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use docrelay_shared::{AppConfig, Event, RelayError, Result, SessionId};

/// Capacity limits applied to every session.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_sessions: usize,
    pub queue_capacity: usize,
    /// Silence after which the stream emits a heartbeat.
    pub idle_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            queue_capacity: 256,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for SessionLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_sessions: config.server.max_sessions,
            queue_capacity: config.server.queue_capacity.max(1),
            idle_timeout: Duration::from_secs(config.server.idle_timeout_secs.max(1)),
        }
    }
}

struct Slot {
    sender: mpsc::Sender<Event>,
    cancel: CancellationToken,
    closed: CancellationToken,
    created_at: Instant,
}

/// The receiving half of a session, handed to the connection that owns it.
pub struct Subscription {
    pub id: SessionId,
    pub events: mpsc::Receiver<Event>,
    /// Fires when a cancel is requested.
    pub cancel: CancellationToken,
    /// Fires when the session is destroyed.
    pub closed: CancellationToken,
}

/// Identifier-keyed lifecycle management for streaming sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Slot>>,
    limits: SessionLimits,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}

impl SessionRegistry {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Register a new session under a freshly generated id.
    ///
    /// Fails with [`RelayError::ResourceExhausted`] once `max_sessions`
    /// sessions are live.
    pub fn create(&self) -> Result<Subscription> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.limits.max_sessions {
            return Err(RelayError::ResourceExhausted {
                limit: self.limits.max_sessions,
            });
        }

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let (sender, events) = mpsc::channel(self.limits.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();
        sessions.insert(
            id.clone(),
            Slot {
                sender,
                cancel: cancel.clone(),
                closed: closed.clone(),
                created_at: Instant::now(),
            },
        );
        let live = sessions.len();
        drop(sessions);

        info!(session_id = %id, live, "session created");
        Ok(Subscription {
            id,
            events,
            cancel,
            closed,
        })
    }

    /// Queue `event` for the session, waiting for space if the queue is full.
    ///
    /// Returns `false` without error when the session no longer exists or is
    /// torn down while waiting.
    pub async fn publish(&self, id: &SessionId, event: Event) -> bool {
        let handle = self
            .sessions
            .lock()
            .get(id)
            .map(|slot| (slot.sender.clone(), slot.closed.clone()));

        let Some((sender, closed)) = handle else {
            debug!(session_id = %id, kind = event.kind(), "publish dropped: no such session");
            return false;
        };

        let kind = event.kind();
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                debug!(session_id = %id, kind = kind, "publish dropped: session closed");
                false
            }
            sent = sender.send(event) => match sent {
                Ok(()) => true,
                Err(err) => {
                    debug!(session_id = %id, kind = err.0.kind(), "publish dropped: receiver gone");
                    false
                }
            },
        }
    }

    /// Set the session's cancellation flag. Setting it twice is harmless.
    pub fn request_cancel(&self, id: &SessionId) -> Result<()> {
        let sessions = self.sessions.lock();
        let slot = sessions
            .get(id)
            .ok_or_else(|| RelayError::not_found(id.as_str()))?;
        slot.cancel.cancel();
        info!(session_id = %id, "cancel requested");
        Ok(())
    }

    /// Whether work for this session should stop.
    ///
    /// An unknown id reads as cancelled: nobody is left to receive events.
    pub fn is_cancelled(&self, id: &SessionId) -> bool {
        self.sessions
            .lock()
            .get(id)
            .is_none_or(|slot| slot.cancel.is_cancelled())
    }

    /// Remove all state for `id`. Returns `false` if it was already gone.
    pub fn destroy(&self, id: &SessionId) -> bool {
        let removed = self.sessions.lock().remove(id);
        match removed {
            Some(slot) => {
                slot.closed.cancel();
                debug!(
                    session_id = %id,
                    age_ms = slot.created_at.elapsed().as_millis() as u64,
                    "session state released"
                );
                true
            }
            None => false,
        }
    }

    /// Destroy every live session, ending their streams. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Slot> = self.sessions.lock().drain().map(|(_, slot)| slot).collect();
        for slot in &drained {
            slot.closed.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all sessions");
        }
        drained.len()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry(max_sessions: usize, queue_capacity: usize) -> SessionRegistry {
        SessionRegistry::new(SessionLimits {
            max_sessions,
            queue_capacity,
            idle_timeout: Duration::from_secs(30),
        })
    }

    #[tokio::test]
    async fn publishes_arrive_in_order() {
        let reg = registry(4, 16);
        let mut sub = reg.create().unwrap();

        for i in 0..10 {
            assert!(reg.publish(&sub.id, Event::progress(i, 10, format!("r{i}"))).await);
        }
        for i in 0..10 {
            match sub.events.recv().await.unwrap() {
                Event::Progress { current, .. } => assert_eq!(current, i),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let reg = registry(8, 1);
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn cap_yields_resource_exhausted() {
        let reg = registry(1, 1);
        let first = reg.create().unwrap();
        assert!(matches!(
            reg.create(),
            Err(RelayError::ResourceExhausted { limit: 1 })
        ));

        reg.destroy(&first.id);
        assert!(reg.create().is_ok());
    }

    #[tokio::test]
    async fn publish_after_destroy_is_silent_noop() {
        let reg = registry(4, 4);
        let mut sub = reg.create().unwrap();
        assert!(reg.destroy(&sub.id));

        assert!(!reg.publish(&sub.id, Event::info("late")).await);
        assert!(sub.events.try_recv().is_err());
        assert!(sub.closed.is_cancelled());
    }

    #[tokio::test]
    async fn blocked_publish_is_released_by_destroy() {
        let reg = Arc::new(registry(4, 1));
        let sub = reg.create().unwrap();
        assert!(reg.publish(&sub.id, Event::info("fills queue")).await);

        let publisher = {
            let reg = Arc::clone(&reg);
            let id = sub.id.clone();
            tokio::spawn(async move { reg.publish(&id, Event::info("waits")).await })
        };
        tokio::task::yield_now().await;
        reg.destroy(&sub.id);

        assert!(!publisher.await.unwrap());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let reg = registry(4, 4);
        let sub = reg.create().unwrap();
        assert!(reg.destroy(&sub.id));
        assert!(!reg.destroy(&sub.id));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn cancel_is_sticky_and_observable() {
        let reg = registry(4, 4);
        let sub = reg.create().unwrap();
        assert!(!reg.is_cancelled(&sub.id));

        reg.request_cancel(&sub.id).unwrap();
        reg.request_cancel(&sub.id).unwrap();
        assert!(reg.is_cancelled(&sub.id));
        assert!(sub.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn close_all_ends_every_session() {
        let reg = registry(4, 4);
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();

        assert_eq!(reg.close_all(), 2);
        assert!(reg.is_empty());
        assert!(a.closed.is_cancelled() && b.closed.is_cancelled());
        assert_eq!(reg.close_all(), 0);
    }

    #[test]
    fn cancel_unknown_is_not_found() {
        let reg = SessionRegistry::default();
        let id = SessionId::from("missing");
        assert!(matches!(
            reg.request_cancel(&id),
            Err(RelayError::NotFound { .. })
        ));
        assert!(reg.is_cancelled(&id));
    }

    #[test]
    fn limits_from_config() {
        let mut config = AppConfig::default();
        config.server.max_sessions = 3;
        config.server.queue_capacity = 0;
        config.server.idle_timeout_secs = 5;

        let limits = SessionLimits::from(&config);
        assert_eq!(limits.max_sessions, 3);
        assert_eq!(limits.queue_capacity, 1);
        assert_eq!(limits.idle_timeout, Duration::from_secs(5));
    }
}
