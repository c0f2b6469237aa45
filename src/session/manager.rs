//! Session lifecycle: create, load, delete, and periodic garbage collection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handler::SessionHandler;
use super::state::Session;
use super::SessionId;
use crate::events::{EventBus, TransportEvent};
use crate::Result;

/// Default idle lifetime of a session.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default interval between garbage collection sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(300);

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session is collected.
    pub ttl: Duration,
    /// How often the collector runs.
    pub gc_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            gc_interval: DEFAULT_GC_INTERVAL,
        }
    }
}

/// Held for the duration of one load-modify-save cycle on a session.
pub type SessionGuard = OwnedMutexGuard<()>;

/// Owns session persistence and announces lifecycle events.
pub struct SessionManager {
    handler: Arc<dyn SessionHandler>,
    events: EventBus,
    config: SessionConfig,
    gc_task: Mutex<Option<JoinHandle<()>>>,
    locks: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(handler: Arc<dyn SessionHandler>, events: EventBus, config: SessionConfig) -> Self {
        Self {
            handler,
            events,
            config,
            gc_task: Mutex::new(None),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn SessionHandler> {
        &self.handler
    }

    /// Serialize writers of one session.
    ///
    /// Every path that loads a session, modifies it and saves it back must
    /// hold this guard across the whole cycle, otherwise the later save
    /// overwrites the earlier one. The guard is not reentrant: do not call
    /// [`queue_message`](Self::queue_message) or
    /// [`dequeue_messages`](Self::dequeue_messages) for the same session
    /// while holding it.
    pub async fn lock_session(&self, id: &SessionId) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    fn forget_lock(&self, id: &SessionId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Create and persist a session with the canonical skeleton.
    pub async fn create_session(&self, id: SessionId) -> Result<Session> {
        let mut session = Session::new(id.clone(), Arc::clone(&self.handler));
        session.save().await?;

        info!(session_id = %id, "session created");
        self.events
            .publish(TransportEvent::SessionCreated { session_id: id });
        Ok(session)
    }

    /// Load a session. Missing entries and unreadable bytes both yield `None`.
    pub async fn get_session(&self, id: &SessionId) -> Result<Option<Session>> {
        let Some(bytes) = self.handler.read(id).await? else {
            return Ok(None);
        };

        match Session::from_bytes(id.clone(), Arc::clone(&self.handler), &bytes) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(session_id = %id, error = %e, "stored session is unreadable");
                Ok(None)
            }
        }
    }

    /// Destroy a session. Returns `false` (and logs) if storage refused.
    pub async fn delete_session(&self, id: &SessionId) -> bool {
        match self.handler.destroy(id).await {
            Ok(()) => {
                self.forget_lock(id);
                info!(session_id = %id, "session deleted");
                self.events.publish(TransportEvent::SessionDeleted {
                    session_id: id.clone(),
                });
                true
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to delete session");
                false
            }
        }
    }

    /// Run one collection sweep and announce every removed session.
    pub async fn gc(&self) -> Vec<SessionId> {
        let removed = match self.handler.gc(self.config.ttl.as_secs()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "session garbage collection failed");
                self.events.publish(TransportEvent::Error {
                    session_id: None,
                    message: format!("session gc failed: {e}"),
                });
                return Vec::new();
            }
        };

        for id in &removed {
            self.forget_lock(id);
            self.events.publish(TransportEvent::SessionDeleted {
                session_id: id.clone(),
            });
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "garbage collected idle sessions");
        }
        removed
    }

    /// Start the periodic collector. A second call while it runs is a no-op.
    pub fn start_gc_timer(self: &Arc<Self>) {
        let Ok(mut slot) = self.gc_task.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.gc_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.gc().await;
            }
        }));
        debug!(interval_secs = period.as_secs(), "session gc timer started");
    }

    /// Stop the periodic collector if it is running.
    pub fn stop_gc_timer(&self) {
        if let Ok(mut slot) = self.gc_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
                debug!("session gc timer stopped");
            }
        }
    }

    pub fn is_gc_running(&self) -> bool {
        self.gc_task
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    /// Append to a session's outbound queue. Silently ignores unknown sessions.
    pub async fn queue_message(&self, id: &SessionId, message: String) {
        let _guard = self.lock_session(id).await;
        let Ok(Some(mut session)) = self.get_session(id).await else {
            debug!(session_id = %id, "dropping message for unknown session");
            return;
        };
        session.queue_message(message);
        if let Err(e) = session.save().await {
            warn!(session_id = %id, error = %e, "failed to persist queued message");
        }
    }

    /// Drain a session's outbound queue. Unknown sessions yield nothing.
    pub async fn dequeue_messages(&self, id: &SessionId) -> Vec<String> {
        let _guard = self.lock_session(id).await;
        let Ok(Some(mut session)) = self.get_session(id).await else {
            return Vec::new();
        };
        let messages = session.dequeue_messages();
        if !messages.is_empty() {
            if let Err(e) = session.save().await {
                warn!(session_id = %id, error = %e, "failed to persist drained queue");
            }
        }
        messages
    }

    pub async fn has_queued_messages(&self, id: &SessionId) -> bool {
        matches!(self.get_session(id).await, Ok(Some(session)) if session.has_queued_messages())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_gc_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ManualClock, MemorySessionHandler};
    use serde_json::json;

    fn manager_with_clock(ttl_secs: u64) -> (Arc<SessionManager>, Arc<ManualClock>, EventBus) {
        let clock = Arc::new(ManualClock::new(10_000));
        let handler = Arc::new(MemorySessionHandler::with_clock(ttl_secs * 10, clock.clone()));
        let events = EventBus::new();
        let config = SessionConfig {
            ttl: Duration::from_secs(ttl_secs),
            gc_interval: Duration::from_millis(20),
        };
        let manager = Arc::new(SessionManager::new(handler, events.clone(), config));
        (manager, clock, events)
    }

    #[tokio::test]
    async fn test_create_session_skeleton() {
        let (manager, _, events) = manager_with_clock(60);
        let mut rx = events.subscribe();
        let id = SessionId::new();

        let session = manager.create_session(id.clone()).await.unwrap();
        assert_eq!(session.get("initialized"), Some(&json!(false)));
        assert_eq!(session.get("message_queue"), Some(&json!([])));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, TransportEvent::SessionCreated { session_id: id });
    }

    #[tokio::test]
    async fn test_get_session_roundtrip_and_missing() {
        let (manager, _, _) = manager_with_clock(60);
        let id = SessionId::new();
        let mut session = manager.create_session(id.clone()).await.unwrap();
        session.set("client_info.name", json!("inspector"));
        session.save().await.unwrap();

        let loaded = manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(loaded.get("client_info.name"), Some(&json!("inspector")));
        assert!(manager.get_session(&SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_session_unparseable_is_absent() {
        let (manager, _, _) = manager_with_clock(60);
        let id = SessionId::new();
        manager.handler().write(&id, b"not json").await.unwrap();
        assert!(manager.get_session(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_session_emits_event() {
        let (manager, _, events) = manager_with_clock(60);
        let id = SessionId::new();
        manager.create_session(id.clone()).await.unwrap();
        let mut rx = events.subscribe();

        assert!(manager.delete_session(&id).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::SessionDeleted {
                session_id: id.clone()
            }
        );
        assert!(manager.get_session(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_queue_wrappers() {
        let (manager, _, _) = manager_with_clock(60);
        let id = SessionId::new();
        manager.create_session(id.clone()).await.unwrap();

        manager.queue_message(&id, "x".into()).await;
        manager.queue_message(&id, "y".into()).await;
        assert!(manager.has_queued_messages(&id).await);
        assert_eq!(manager.dequeue_messages(&id).await, vec!["x", "y"]);
        assert!(!manager.has_queued_messages(&id).await);
    }

    #[tokio::test]
    async fn test_message_queue_unknown_session_is_noop() {
        let (manager, _, _) = manager_with_clock(60);
        let ghost = SessionId::new();
        manager.queue_message(&ghost, "x".into()).await;
        assert!(manager.dequeue_messages(&ghost).await.is_empty());
        assert!(!manager.has_queued_messages(&ghost).await);
    }

    #[tokio::test]
    async fn test_queue_waits_for_held_session() {
        let (manager, _, _) = manager_with_clock(60);
        let id = SessionId::new();
        manager.create_session(id.clone()).await.unwrap();

        let guard = manager.lock_session(&id).await;
        let mut session = manager.get_session(&id).await.unwrap().unwrap();

        let queued = {
            let manager = Arc::clone(&manager);
            let id = id.clone();
            tokio::spawn(async move { manager.queue_message(&id, "pushed".into()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!queued.is_finished());

        session.set("x", json!(1));
        session.save().await.unwrap();
        drop(guard);
        queued.await.unwrap();

        let stored = manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(stored.get("x"), Some(&json!(1)));
        assert_eq!(manager.dequeue_messages(&id).await, vec!["pushed"]);
    }

    #[tokio::test]
    async fn test_delete_releases_session_lock() {
        let (manager, _, _) = manager_with_clock(60);
        let id = SessionId::new();
        manager.create_session(id.clone()).await.unwrap();
        drop(manager.lock_session(&id).await);
        assert_eq!(manager.locks.lock().unwrap().len(), 1);

        manager.delete_session(&id).await;
        assert!(manager.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gc_removes_only_strictly_older() {
        let (manager, clock, events) = manager_with_clock(100);
        let stale = SessionId::new();
        let edge = SessionId::new();
        manager.create_session(stale.clone()).await.unwrap();
        clock.advance(1);
        manager.create_session(edge.clone()).await.unwrap();
        clock.advance(100);

        let mut rx = events.subscribe();
        let removed = manager.gc().await;
        assert_eq!(removed, vec![stale.clone()]);
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::SessionDeleted { session_id: stale }
        );
        assert!(manager.get_session(&edge).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_gc_timer_is_idempotent_and_runs() {
        let (manager, clock, events) = manager_with_clock(5);
        let id = SessionId::new();
        manager.create_session(id.clone()).await.unwrap();
        clock.advance(6);

        let mut rx = events.subscribe();
        manager.start_gc_timer();
        manager.start_gc_timer();
        assert!(manager.is_gc_running());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("gc should run")
            .unwrap();
        assert_eq!(event, TransportEvent::SessionDeleted { session_id: id });

        manager.stop_gc_timer();
        assert!(!manager.is_gc_running());
        manager.stop_gc_timer();
    }
}
