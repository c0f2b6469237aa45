//! Key/value cache abstraction used by the cache-backed session handler.
//!
//! The contract mirrors what shared caches (Redis, memcached) offer: point
//! reads, writes with an optional TTL, and deletes. There is no way to list
//! keys.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;
use crate::session::{Clock, SystemClock};
use crate::Result;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

/// In-process cache honoring per-entry TTLs.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().map_err(|_| Error::LockPoisoned)?;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.expires_at.is_some_and(|at| now > at),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| self.clock.now_secs() + ttl.as_secs());
        self.entries
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .remove(key);
        Ok(())
    }
}
