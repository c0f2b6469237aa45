//! Replay buffer for push-stream events.
//!
//! Every frame written to a push stream can be recorded here first; the
//! returned id becomes the SSE `id:` line. A reconnecting client sends the
//! last id it saw in `Last-Event-ID` and receives everything recorded after
//! it on the same stream.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Error;
use crate::Result;

/// Storage for replayable events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record `message` on `stream_id` and return its event id.
    async fn store_event(&self, stream_id: &str, message: &str) -> Result<String>;

    /// Replay every event recorded after `last_event_id` on that event's
    /// stream, oldest first. Returns the stream id, or `None` if the marker
    /// is unknown.
    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sink: &mut (dyn FnMut(String, String) + Send),
    ) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
struct StoredEvent {
    event_id: String,
    stream_id: String,
    seq: u64,
    message: String,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    events: Vec<StoredEvent>,
}

/// In-process event store, unbounded unless built with
/// [`with_capacity_limit`](Self::with_capacity_limit).
///
/// Event ids have the form `<stream_id>_<seq>` with a sequence shared by all
/// streams of this store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
    max_events: Option<usize>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_events`, dropping the oldest first.
    pub fn with_capacity_limit(max_events: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_events: Some(max_events.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, stream_id: &str, message: &str) -> Result<String> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let event_id = format!("{stream_id}_{seq}");

        inner.events.push(StoredEvent {
            event_id: event_id.clone(),
            stream_id: stream_id.to_string(),
            seq,
            message: message.to_string(),
        });

        if let Some(max) = self.max_events {
            let excess = inner.events.len().saturating_sub(max);
            if excess > 0 {
                inner.events.drain(..excess);
            }
        }
        Ok(event_id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sink: &mut (dyn FnMut(String, String) + Send),
    ) -> Result<Option<String>> {
        let (stream_id, replay) = {
            let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
            let Some(marker) = inner.events.iter().find(|e| e.event_id == last_event_id) else {
                return Ok(None);
            };
            let stream_id = marker.stream_id.clone();
            let after = marker.seq;
            let replay: Vec<StoredEvent> = inner
                .events
                .iter()
                .filter(|e| e.stream_id == stream_id && e.seq > after)
                .cloned()
                .collect();
            (stream_id, replay)
        };

        for event in replay {
            sink(event.event_id, event.message);
        }
        Ok(Some(stream_id))
    }
}
