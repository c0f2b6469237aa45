//! Configuration management for streamable-rpc.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthConfig;
use crate::cli::Args;
use crate::event_store::InMemoryEventStore;
use crate::session::SessionConfig;
use crate::transport::TransportConfig;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub transport: TransportSection,
    pub session: SessionSection,
    pub pagination: PaginationSection,
    pub auth: AuthSection,
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Base path of the transport endpoint.
    pub path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            path: "/mcp".to_string(),
        }
    }
}

/// Transport configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Header carrying the session id.
    pub session_header: String,
    /// Answer with plain JSON when the client accepts it.
    pub direct_response: bool,
    /// Disable session identity rules.
    pub stateless: bool,
    pub request_timeout_secs: u64,
    /// Frames buffered per stream.
    pub stream_buffer: usize,
    /// Keep push events for replay after reconnects.
    pub event_store: bool,
    /// Most events the replay store keeps; the oldest are dropped first.
    pub event_store_capacity: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            session_header: "Mcp-Session-Id".to_string(),
            direct_response: true,
            stateless: false,
            request_timeout_secs: 30,
            stream_buffer: 64,
            event_store: false,
            event_store_capacity: 1024,
        }
    }
}

/// Where sessions are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    Cache,
}

/// Session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_secs: u64,
    pub gc_interval_secs: u64,
    pub backend: SessionBackend,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            gc_interval_secs: 300,
            backend: SessionBackend::Memory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSection {
    /// Items per page for list methods.
    pub limit: usize,
}

impl Default for PaginationSection {
    fn default() -> Self {
        Self { limit: 50 }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Enable authentication.
    pub enabled: bool,
    /// API keys.
    pub api_keys: Vec<String>,
    /// Path prefixes requiring a key. Empty means the transport path.
    pub protected_paths: Vec<String>,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("STREAMABLE_RPC_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("STREAMABLE_RPC_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(path) = var("STREAMABLE_RPC_PATH") {
            self.server.path = path;
        }

        if let Some(key) = var("STREAMABLE_RPC_API_KEY") {
            if !key.is_empty() {
                self.auth.enabled = true;
                if !self.auth.api_keys.contains(&key) {
                    self.auth.api_keys.push(key);
                }
            }
        }

        if let Some(stateless) = var("STREAMABLE_RPC_STATELESS") {
            self.transport.stateless = matches!(
                stateless.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        if let Some(level) = var("STREAMABLE_RPC_LOG_LEVEL").or_else(|| var("RUST_LOG")) {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref key) = args.api_key {
            self.auth.enabled = true;
            if !self.auth.api_keys.contains(key) {
                self.auth.api_keys.push(key.clone());
            }
        }

        if args.no_auth {
            self.auth.enabled = false;
        }

        if args.stateless {
            self.transport.stateless = true;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address()?;
        self.session_header()?;
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.server.path.clone()));
        }
        if self.transport.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("transport.request_timeout_secs"));
        }
        if self.transport.event_store && self.transport.event_store_capacity == 0 {
            return Err(ConfigError::InvalidValue("transport.event_store_capacity"));
        }
        if self.pagination.limit == 0 {
            return Err(ConfigError::InvalidValue("pagination.limit"));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;
        Ok(SocketAddr::new(host, self.server.port))
    }

    fn session_header(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.transport.session_header.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(self.transport.session_header.clone()))
    }

    pub fn to_transport_config(&self) -> Result<TransportConfig, ConfigError> {
        Ok(TransportConfig {
            path: self.server.path.clone(),
            session_header: self.session_header()?,
            direct_response: self.transport.direct_response,
            stateless: self.transport.stateless,
            request_timeout: Duration::from_secs(self.transport.request_timeout_secs),
            stream_buffer: self.transport.stream_buffer.max(1),
            ..TransportConfig::default()
        })
    }

    /// The replay store, if enabled.
    pub fn to_event_store(&self) -> Option<InMemoryEventStore> {
        self.transport
            .event_store
            .then(|| InMemoryEventStore::with_capacity_limit(self.transport.event_store_capacity))
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl: Duration::from_secs(self.session.ttl_secs),
            gc_interval: Duration::from_secs(self.session.gc_interval_secs.max(1)),
        }
    }

    pub fn to_auth_config(&self) -> AuthConfig {
        let protected_paths = if self.auth.protected_paths.is_empty() {
            vec![self.server.path.clone()]
        } else {
            self.auth.protected_paths.clone()
        };
        AuthConfig {
            enabled: self.auth.enabled,
            protected_paths,
            ..AuthConfig::default()
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid host address: {0}")]
    InvalidHost(String),

    #[error("invalid header name: {0}")]
    InvalidHeader(String),

    #[error("transport path must start with '/': {0}")]
    InvalidPath(String),

    #[error("{0} must be greater than zero")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStore;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.path, "/mcp");
        assert!(config.transport.direct_response);
        assert!(!config.auth.enabled);
        assert_eq!(config.session.backend, SessionBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": { "host": "0.0.0.0", "port": 8080, "path": "/rpc" },
            "transport": { "stateless": true, "request_timeout_secs": 5 },
            "session": { "ttl_secs": 60, "backend": "cache" },
            "auth": { "enabled": true, "api_keys": ["key1", "key2"] }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.path, "/rpc");
        assert!(config.transport.stateless);
        assert_eq!(config.transport.session_header, "Mcp-Session-Id");
        assert_eq!(config.session.backend, SessionBackend::Cache);
        assert_eq!(config.session.gc_interval_secs, 300);
        assert_eq!(config.auth.api_keys.len(), 2);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_apply_env_from() {
        let vars: HashMap<&str, &str> = [
            ("STREAMABLE_RPC_PORT", "4100"),
            ("STREAMABLE_RPC_API_KEY", "env-key"),
            ("STREAMABLE_RPC_STATELESS", "true"),
            ("RUST_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.port, 4100);
        assert!(config.auth.enabled);
        assert_eq!(config.auth.api_keys, vec!["env-key"]);
        assert!(config.transport.stateless);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            port: Some(5000),
            api_key: Some("test-key".to_string()),
            stateless: true,
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 5000);
        assert!(config.auth.enabled);
        assert!(config.auth.api_keys.contains(&"test-key".to_string()));
        assert!(config.transport.stateless);
    }

    #[test]
    fn test_unset_args_keep_file_values() {
        let mut config = Config::default();
        config.server.port = 9000;
        config.apply_args(&Args::default());
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_apply_no_auth() {
        let mut config = Config::default();
        config.auth.enabled = true;

        let args = Args {
            no_auth: true,
            ..Args::default()
        };

        config.apply_args(&args);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_to_runtime_configs() {
        let mut config = Config::default();
        config.transport.request_timeout_secs = 7;
        config.session.ttl_secs = 120;

        let transport = config.to_transport_config().unwrap();
        assert_eq!(transport.path, "/mcp");
        assert_eq!(transport.session_header.as_str(), "mcp-session-id");
        assert_eq!(transport.request_timeout, Duration::from_secs(7));

        let session = config.to_session_config();
        assert_eq!(session.ttl, Duration::from_secs(120));
        assert_eq!(session.gc_interval, Duration::from_secs(300));

        let auth = config.to_auth_config();
        assert_eq!(auth.protected_paths, vec!["/mcp"]);

        assert!(config.to_event_store().is_none());
    }

    #[tokio::test]
    async fn test_event_store_is_bounded() {
        let mut config = Config::default();
        config.transport.event_store = true;
        config.transport.event_store_capacity = 100;

        let store = config.to_event_store().unwrap();
        for i in 0..10_000 {
            store.store_event("s", &i.to_string()).await.unwrap();
        }
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHost(_))));

        let mut config = Config::default();
        config.transport.session_header = "bad header".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHeader(_))));

        let mut config = Config::default();
        config.server.path = "mcp".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPath(_))));

        let mut config = Config::default();
        config.pagination.limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.transport.event_store = true;
        config.transport.event_store_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue("transport.event_store_capacity"))
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"session_header\""));
        assert!(json.contains("\"backend\": \"memory\""));
    }
}
