use std::time::Duration;

use axum::http::HeaderName;

pub const DEFAULT_PATH: &str = "/mcp";
pub const DEFAULT_SESSION_HEADER: &str = "mcp-session-id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STREAM_BUFFER: usize = 64;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Transport behavior.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base path all three verbs are served on.
    pub path: String,
    /// Header carrying the session id in both directions.
    pub session_header: HeaderName,
    /// Answer POSTs with a plain JSON body when the client accepts one.
    pub direct_response: bool,
    /// Skip session identity rules; every POST gets a throwaway session.
    pub stateless: bool,
    /// Ceiling on how long a POST waits for its responses.
    pub request_timeout: Duration,
    /// Frames buffered per push stream before writers wait.
    pub stream_buffer: usize,
    /// Interval of SSE keep-alive comments.
    pub keep_alive: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            session_header: HeaderName::from_static(DEFAULT_SESSION_HEADER),
            direct_response: true,
            stateless: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl TransportConfig {
    pub fn stateless() -> Self {
        Self {
            stateless: true,
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_direct_response(mut self, enabled: bool) -> Self {
        self.direct_response = enabled;
        self
    }
}
