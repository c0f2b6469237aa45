//! Session storage on top of a shared [`Cache`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::clock::{Clock, SystemClock};
use super::handler::SessionHandler;
use super::SessionId;
use crate::cache::Cache;
use crate::Result;

const DEFAULT_INDEX_KEY: &str = "session_index";
const KEY_PREFIX: &str = "session:";

type SessionIndex = BTreeMap<String, u64>;

/// Stores each session under its own cache key and keeps a side index of
/// `id -> last touch` in a single cache entry, since caches cannot
/// enumerate their keys.
///
/// Processes sharing one cache converge on the index by last write wins;
/// there is no locking across processes.
pub struct CacheSessionHandler {
    cache: Arc<dyn Cache>,
    ttl_secs: u64,
    clock: Arc<dyn Clock>,
    index_key: String,
}

impl CacheSessionHandler {
    pub fn new(cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        Self::with_clock(cache, ttl_secs, Arc::new(SystemClock))
    }

    pub fn with_clock(cache: Arc<dyn Cache>, ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            ttl_secs,
            clock,
            index_key: DEFAULT_INDEX_KEY.to_string(),
        }
    }

    /// Use a custom cache key for the index, e.g. to separate deployments
    /// sharing one cache.
    pub fn with_index_key(mut self, key: impl Into<String>) -> Self {
        self.index_key = key.into();
        self
    }

    fn entry_key(id: &SessionId) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    async fn load_index(&self) -> Result<SessionIndex> {
        match self.cache.get(&self.index_key).await? {
            None => Ok(SessionIndex::new()),
            Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable session index");
                SessionIndex::new()
            })),
        }
    }

    async fn store_index(&self, index: &SessionIndex) -> Result<()> {
        let bytes = serde_json::to_vec(index)?;
        self.cache.set(&self.index_key, bytes, None).await
    }
}

#[async_trait]
impl SessionHandler for CacheSessionHandler {
    async fn read(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        let mut index = self.load_index().await?;
        let now = self.clock.now_secs();

        let expired = index
            .get(id.as_str())
            .is_some_and(|touched| now.saturating_sub(*touched) > self.ttl_secs);
        if expired {
            self.cache.delete(&Self::entry_key(id)).await?;
            index.remove(id.as_str());
            self.store_index(&index).await?;
            return Ok(None);
        }

        match self.cache.get(&Self::entry_key(id)).await? {
            None => {
                if index.remove(id.as_str()).is_some() {
                    self.store_index(&index).await?;
                }
                Ok(None)
            }
            Some(data) => {
                if !index.contains_key(id.as_str()) {
                    index.insert(id.to_string(), now);
                    self.store_index(&index).await?;
                }
                Ok(Some(data))
            }
        }
    }

    async fn write(&self, id: &SessionId, data: &[u8]) -> Result<()> {
        self.cache
            .set(
                &Self::entry_key(id),
                data.to_vec(),
                Some(Duration::from_secs(self.ttl_secs)),
            )
            .await?;

        let mut index = self.load_index().await?;
        index.insert(id.to_string(), self.clock.now_secs());
        self.store_index(&index).await
    }

    async fn destroy(&self, id: &SessionId) -> Result<()> {
        self.cache.delete(&Self::entry_key(id)).await?;
        let mut index = self.load_index().await?;
        if index.remove(id.as_str()).is_some() {
            self.store_index(&index).await?;
        }
        Ok(())
    }

    async fn gc(&self, max_lifetime_secs: u64) -> Result<Vec<SessionId>> {
        let mut index = self.load_index().await?;
        let now = self.clock.now_secs();

        let expired: Vec<String> = index
            .iter()
            .filter(|(_, touched)| now.saturating_sub(**touched) > max_lifetime_secs)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(expired.len());
        for raw in expired {
            let id = SessionId::from_raw(raw);
            self.cache.delete(&Self::entry_key(&id)).await?;
            index.remove(id.as_str());
            removed.push(id);
        }
        self.store_index(&index).await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::session::ManualClock;

    struct Fixture {
        cache: Arc<MemoryCache>,
        clock: Arc<ManualClock>,
        handler: CacheSessionHandler,
    }

    fn fixture(ttl: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(5_000));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let handler = CacheSessionHandler::with_clock(cache.clone(), ttl, clock.clone());
        Fixture {
            cache,
            clock,
            handler,
        }
    }

    async fn index_of(f: &Fixture) -> SessionIndex {
        let bytes = f.cache.get(DEFAULT_INDEX_KEY).await.unwrap().unwrap_or_default();
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_write_updates_index() {
        let f = fixture(600);
        let id = SessionId::new();
        f.handler.write(&id, b"{}").await.unwrap();

        let index = index_of(&f).await;
        assert_eq!(index.get(id.as_str()), Some(&5_000));
        assert_eq!(f.handler.read(&id).await.unwrap(), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_destroy_prunes_index() {
        let f = fixture(600);
        let id = SessionId::new();
        f.handler.write(&id, b"{}").await.unwrap();
        f.handler.destroy(&id).await.unwrap();

        assert!(f.handler.read(&id).await.unwrap().is_none());
        assert!(index_of(&f).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_of_evicted_entry_prunes_index() {
        let f = fixture(600);
        let id = SessionId::new();
        f.handler.write(&id, b"{}").await.unwrap();
        f.cache
            .delete(&CacheSessionHandler::entry_key(&id))
            .await
            .unwrap();

        assert!(f.handler.read(&id).await.unwrap().is_none());
        assert!(index_of(&f).await.is_empty());
    }

    #[tokio::test]
    async fn test_gc_walks_index() {
        let f = fixture(3600);
        let stale = SessionId::new();
        let fresh = SessionId::new();

        f.handler.write(&stale, b"{}").await.unwrap();
        f.clock.advance(200);
        f.handler.write(&fresh, b"{}").await.unwrap();
        f.clock.advance(100);

        let removed = f.handler.gc(100).await.unwrap();
        assert_eq!(removed, vec![stale.clone()]);
        assert!(f.handler.read(&stale).await.unwrap().is_none());
        assert!(f.handler.read(&fresh).await.unwrap().is_some());

        let index = index_of(&f).await;
        assert_eq!(index.len(), 1);
        assert!(index.contains_key(fresh.as_str()));
    }

    #[tokio::test]
    async fn test_shared_cache_between_handlers() {
        let f = fixture(600);
        let other = CacheSessionHandler::with_clock(f.cache.clone(), 600, f.clock.clone());
        let id = SessionId::new();

        f.handler.write(&id, b"{\"k\":1}").await.unwrap();
        assert_eq!(other.read(&id).await.unwrap(), Some(b"{\"k\":1}".to_vec()));

        other.destroy(&id).await.unwrap();
        assert!(f.handler.read(&id).await.unwrap().is_none());
    }
}
