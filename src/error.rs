//! Error types for streamable-rpc.

use thiserror::Error;

/// Main error type for session and transport plumbing.
#[derive(Error, Debug)]
pub enum Error {
    /// Session with the given ID was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Text that is not a well-formed session ID.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Backing cache operation failed. Raised by [`crate::Cache`]
    /// implementations.
    #[error("cache error: {0}")]
    Cache(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket bind or serve failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Convenience Result type for streamable-rpc operations.
pub type Result<T> = std::result::Result<T, Error>;
