//! Internal lifecycle event bus.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::session::SessionId;

const DEFAULT_CAPACITY: usize = 256;

/// Everything the runtime announces about sessions and clients.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    SessionCreated { session_id: SessionId },
    SessionDeleted { session_id: SessionId },
    ClientConnected { session_id: SessionId },
    ClientDisconnected { session_id: SessionId },
    /// An inbound payload accepted for dispatch.
    Message { session_id: SessionId, payload: Value },
    Error {
        session_id: Option<SessionId>,
        message: String,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionCreated { session_id }
            | Self::SessionDeleted { session_id }
            | Self::ClientConnected { session_id }
            | Self::ClientDisconnected { session_id }
            | Self::Message { session_id, .. } => Some(session_id),
            Self::Error { session_id, .. } => session_id.as_ref(),
        }
    }
}

/// Broadcast fan-out of [`TransportEvent`]s.
///
/// Slow subscribers lag and miss events rather than block publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransportEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: TransportEvent) {
        tracing::trace!(kind = event.kind(), "event published");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(TransportEvent::Error {
            session_id: None,
            message: "nobody listening".into(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = SessionId::new();

        bus.publish(TransportEvent::SessionCreated {
            session_id: id.clone(),
        });
        bus.publish(TransportEvent::SessionDeleted {
            session_id: id.clone(),
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind(), "session_created");
        assert_eq!(second.kind(), "session_deleted");
        assert_eq!(second.session_id(), Some(&id));
    }
}
