//! Per-session key/value state.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::handler::SessionHandler;
use super::SessionId;
use crate::Result;

pub const KEY_INITIALIZED: &str = "initialized";
pub const KEY_CLIENT_INFO: &str = "client_info";
pub const KEY_PROTOCOL_VERSION: &str = "protocol_version";
pub const KEY_MESSAGE_QUEUE: &str = "message_queue";
pub const KEY_LOG_LEVEL: &str = "log_level";

/// State bag for one client session.
///
/// Values are addressed with dot-separated paths (`client_info.name`).
/// Nothing is persisted until [`Session::save`] is called.
pub struct Session {
    id: SessionId,
    handler: Arc<dyn SessionHandler>,
    data: Map<String, Value>,
    dirty: bool,
}

impl Session {
    /// Create a session holding only the canonical skeleton.
    pub fn new(id: SessionId, handler: Arc<dyn SessionHandler>) -> Self {
        let mut session = Self {
            id,
            handler,
            data: Map::new(),
            dirty: false,
        };
        session.hydrate(Map::new());
        session
    }

    /// Rebuild a session from bytes previously written by [`Session::save`].
    pub fn from_bytes(
        id: SessionId,
        handler: Arc<dyn SessionHandler>,
        bytes: &[u8],
    ) -> Result<Self> {
        let attributes: Map<String, Value> = serde_json::from_slice(bytes)?;
        let mut session = Self::new(id, handler);
        session.hydrate(attributes);
        session.dirty = false;
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Merge `attributes` over the skeleton; caller values win and any `id`
    /// key is dropped.
    pub fn hydrate(&mut self, attributes: Map<String, Value>) {
        let mut data = skeleton();
        data.extend(attributes);
        data.remove("id");
        self.data = data;
        self.dirty = true;
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).cloned().unwrap_or(default)
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a value, overwriting whatever is there.
    pub fn set(&mut self, path: &str, value: Value) {
        self.set_with(path, value, true);
    }

    /// Set a value. Missing or non-map intermediate segments become empty
    /// maps. With `overwrite == false` an existing non-null value is kept.
    pub fn set_with(&mut self, path: &str, value: Value, overwrite: bool) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.data;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }

        let occupied = current.get(last).is_some_and(|v| !v.is_null());
        if overwrite || !occupied {
            current.insert(last.to_string(), value);
            self.dirty = true;
        }
    }

    /// Remove the value at `path`, leaving its parent in place.
    pub fn forget(&mut self, path: &str) -> Option<Value> {
        let (parent, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, path),
        };

        let container = match parent {
            None => &mut self.data,
            Some(parent) => {
                let mut segments = parent.split('.');
                let first = segments.next()?;
                let mut current = self.data.get_mut(first)?.as_object_mut()?;
                for segment in segments {
                    current = current.get_mut(segment)?.as_object_mut()?;
                }
                current
            }
        };

        let removed = container.remove(last);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Get then forget.
    pub fn pull(&mut self, path: &str) -> Option<Value> {
        self.forget(path)
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn queue_message(&mut self, message: impl Into<String>) {
        let entry = self
            .data
            .entry(KEY_MESSAGE_QUEUE.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(queue) = entry {
            queue.push(Value::String(message.into()));
        }
        self.dirty = true;
    }

    /// Drain the outbound queue, oldest first.
    pub fn dequeue_messages(&mut self) -> Vec<String> {
        let drained = match self.data.get_mut(KEY_MESSAGE_QUEUE) {
            Some(Value::Array(queue)) => std::mem::take(queue),
            _ => Vec::new(),
        };
        self.data
            .insert(KEY_MESSAGE_QUEUE.to_string(), Value::Array(Vec::new()));
        if !drained.is_empty() {
            self.dirty = true;
        }
        drained
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn has_queued_messages(&self) -> bool {
        matches!(self.data.get(KEY_MESSAGE_QUEUE), Some(Value::Array(q)) if !q.is_empty())
    }

    /// Whether anything changed since the session was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist the full state through the owning handler.
    pub async fn save(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.data)?;
        self.handler.write(&self.id, &bytes).await?;
        self.dirty = false;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

fn skeleton() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(KEY_INITIALIZED.to_string(), Value::Bool(false));
    map.insert(KEY_CLIENT_INFO.to_string(), Value::Null);
    map.insert(KEY_PROTOCOL_VERSION.to_string(), Value::Null);
    map.insert(KEY_MESSAGE_QUEUE.to_string(), Value::Array(Vec::new()));
    map.insert(KEY_LOG_LEVEL.to_string(), Value::Null);
    map
}
