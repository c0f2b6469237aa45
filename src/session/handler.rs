//! Pluggable persistence for serialized sessions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::clock::{Clock, SystemClock};
use super::SessionId;
use crate::error::Error;
use crate::Result;

/// Storage contract for session bytes.
///
/// An entry whose last write is older than the handler's TTL behaves as if
/// it did not exist.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn read(&self, id: &SessionId) -> Result<Option<Vec<u8>>>;

    async fn write(&self, id: &SessionId, data: &[u8]) -> Result<()>;

    async fn destroy(&self, id: &SessionId) -> Result<()>;

    /// Remove every entry idle for strictly longer than `max_lifetime_secs`
    /// and return the removed IDs.
    async fn gc(&self, max_lifetime_secs: u64) -> Result<Vec<SessionId>>;
}

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    touched: u64,
}

/// In-process session storage.
#[derive(Debug)]
pub struct MemorySessionHandler {
    entries: RwLock<HashMap<SessionId, Entry>>,
    ttl_secs: u64,
    clock: Arc<dyn Clock>,
}

impl MemorySessionHandler {
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_clock(ttl_secs, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs,
            clock,
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionHandler for MemorySessionHandler {
    async fn read(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().map_err(|_| Error::LockPoisoned)?;

        let expired = match entries.get(id) {
            None => return Ok(None),
            Some(entry) => now.saturating_sub(entry.touched) > self.ttl_secs,
        };

        if expired {
            entries.remove(id);
            return Ok(None);
        }

        Ok(entries.get(id).map(|entry| entry.data.clone()))
    }

    async fn write(&self, id: &SessionId, data: &[u8]) -> Result<()> {
        let entry = Entry {
            data: data.to_vec(),
            touched: self.clock.now_secs(),
        };
        self.entries
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .insert(id.clone(), entry);
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .remove(id);
        Ok(())
    }

    async fn gc(&self, max_lifetime_secs: u64) -> Result<Vec<SessionId>> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().map_err(|_| Error::LockPoisoned)?;

        let expired: Vec<SessionId> = entries
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.touched) > max_lifetime_secs)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            entries.remove(id);
        }
        Ok(expired)
    }
}
