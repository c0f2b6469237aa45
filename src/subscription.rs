//! Per-session resource subscriptions.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::Error;
use crate::session::SessionId;
use crate::Result;

/// Tracks which sessions want update notifications for which resource URIs.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    by_session: RwLock<HashMap<SessionId, HashSet<String>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the subscription is new.
    pub fn subscribe(&self, session_id: &SessionId, uri: impl Into<String>) -> Result<bool> {
        let mut map = self.by_session.write().map_err(|_| Error::LockPoisoned)?;
        Ok(map.entry(session_id.clone()).or_default().insert(uri.into()))
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, session_id: &SessionId, uri: &str) -> Result<bool> {
        let mut map = self.by_session.write().map_err(|_| Error::LockPoisoned)?;
        let Some(uris) = map.get_mut(session_id) else {
            return Ok(false);
        };
        let removed = uris.remove(uri);
        if uris.is_empty() {
            map.remove(session_id);
        }
        Ok(removed)
    }

    pub fn is_subscribed(&self, session_id: &SessionId, uri: &str) -> bool {
        self.by_session
            .read()
            .map(|map| map.get(session_id).is_some_and(|uris| uris.contains(uri)))
            .unwrap_or(false)
    }

    /// Sessions subscribed to `uri`.
    pub fn subscribers(&self, uri: &str) -> Vec<SessionId> {
        self.by_session
            .read()
            .map(|map| {
                map.iter()
                    .filter(|(_, uris)| uris.contains(uri))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every subscription held by a session.
    pub fn remove_session(&self, session_id: &SessionId) {
        if let Ok(mut map) = self.by_session.write() {
            map.remove(session_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.by_session.read().map(|m| m.len()).unwrap_or(0)
    }
}
