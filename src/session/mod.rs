//! Session management module.
//!
//! This module provides session identification, the per-session state bag,
//! pluggable storage handlers, and the lifecycle manager with its garbage
//! collector.

mod cache_handler;
mod clock;
mod handler;
mod id;
mod manager;
mod state;

pub use cache_handler::CacheSessionHandler;
pub use clock::{Clock, ManualClock, SystemClock};
pub use handler::{MemorySessionHandler, SessionHandler};
pub use id::SessionId;
pub use manager::{
    SessionConfig, SessionGuard, SessionManager, DEFAULT_GC_INTERVAL, DEFAULT_TTL,
};
pub use state::{
    Session, KEY_CLIENT_INFO, KEY_INITIALIZED, KEY_LOG_LEVEL, KEY_MESSAGE_QUEUE,
    KEY_PROTOCOL_VERSION,
};
