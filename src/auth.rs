//! Authorization seam.
//!
//! The transport only needs to know whether a path is protected and, if so,
//! who the caller is. Token validation schemes plug in behind
//! [`Authorizer`]; [`ApiKeyAuthorizer`] is a static Bearer key check.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::transport::TransportError;

/// Validated caller identity, attached to the request extensions and copied
/// into every dispatch context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthInfo {
    attributes: Map<String, Value>,
}

impl AuthInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether requests to `path` need an identity.
    fn protects(&self, path: &str) -> bool;

    /// Validate the request headers. `None` means unauthorized.
    async fn authorize(&self, headers: &HeaderMap) -> Option<AuthInfo>;
}

/// API key configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Whether authentication is enabled.
    pub enabled: bool,
    /// Prefix for the API key (default: "Bearer ").
    pub prefix: String,
    /// Path prefixes that require a key.
    pub protected_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "Bearer ".to_string(),
            protected_paths: vec!["/mcp".to_string()],
        }
    }
}

impl AuthConfig {
    /// Create a disabled auth config (for development).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn protecting(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            protected_paths: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Bearer token check against a set of static keys.
#[derive(Debug)]
pub struct ApiKeyAuthorizer {
    keys: RwLock<HashSet<String>>,
    config: AuthConfig,
}

impl ApiKeyAuthorizer {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            keys: RwLock::new(HashSet::new()),
            config,
        }
    }

    pub fn disabled() -> Self {
        Self::new(AuthConfig::disabled())
    }

    pub fn with_key(self, key: impl Into<String>) -> Self {
        self.add_key(key);
        self
    }

    pub fn add_key(&self, key: impl Into<String>) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key.into());
        }
    }

    pub fn remove_key(&self, key: &str) -> bool {
        self.keys
            .write()
            .map(|mut keys| keys.remove(key))
            .unwrap_or(false)
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.keys
            .read()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Extract the key from an `Authorization` header value.
    pub fn extract_key<'a>(&self, header_value: &'a str) -> Option<&'a str> {
        header_value.strip_prefix(self.config.prefix.as_str())
    }
}

/// Whether `path` is `protected` or lies below it, matching whole segments.
fn covers(protected: &str, path: &str) -> bool {
    let base = protected.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[async_trait]
impl Authorizer for ApiKeyAuthorizer {
    fn protects(&self, path: &str) -> bool {
        self.config.enabled
            && self
                .config
                .protected_paths
                .iter()
                .any(|protected| covers(protected, path))
    }

    async fn authorize(&self, headers: &HeaderMap) -> Option<AuthInfo> {
        let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let key = self.extract_key(header)?;
        if !self.is_valid(key) {
            return None;
        }
        Some(
            AuthInfo::new()
                .with("scheme", "api_key")
                .with("key_hint", key.chars().take(4).collect::<String>()),
        )
    }
}

/// Authentication middleware for axum.
///
/// Unprotected paths pass through untouched. Protected paths need an
/// identity from the authorizer, which is stored in the request extensions.
pub async fn auth_middleware(
    State(authorizer): State<Arc<dyn Authorizer>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !authorizer.protects(request.uri().path()) {
        return next.run(request).await;
    }

    match authorizer.authorize(request.headers()).await {
        Some(info) => {
            request.extensions_mut().insert(info);
            next.run(request).await
        }
        None => {
            debug!(path = %request.uri().path(), "rejecting unauthenticated request");
            TransportError::Unauthorized.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert!(config.enabled);
        assert_eq!(config.prefix, "Bearer ");
        assert_eq!(config.protected_paths, vec!["/mcp"]);
    }

    #[test]
    fn test_key_add_remove() {
        let auth = ApiKeyAuthorizer::new(AuthConfig::default());
        auth.add_key("test-key-123");
        assert!(auth.is_valid("test-key-123"));
        assert!(!auth.is_valid("invalid-key"));
        assert_eq!(auth.count(), 1);

        assert!(auth.remove_key("test-key-123"));
        assert!(!auth.is_valid("test-key-123"));
        assert_eq!(auth.count(), 0);
    }

    #[test]
    fn test_extract_key() {
        let auth = ApiKeyAuthorizer::new(AuthConfig::default());
        assert_eq!(auth.extract_key("Bearer my-secret-key"), Some("my-secret-key"));
        assert!(auth.extract_key("Basic credentials").is_none());
    }

    #[test]
    fn test_protects_whole_segments() {
        let auth = ApiKeyAuthorizer::new(AuthConfig::protecting(["/mcp"]));
        assert!(auth.protects("/mcp"));
        assert!(auth.protects("/mcp/"));
        assert!(auth.protects("/mcp/sub"));
        assert!(!auth.protects("/mcpfoo"));
        assert!(!auth.protects("/health"));

        let everything = ApiKeyAuthorizer::new(AuthConfig::protecting(["/"]));
        assert!(everything.protects("/"));
        assert!(everything.protects("/health"));
        assert!(!ApiKeyAuthorizer::disabled().protects("/mcp"));
    }

    #[tokio::test]
    async fn test_authorize() {
        let auth = ApiKeyAuthorizer::new(AuthConfig::default()).with_key("secret");

        let info = auth.authorize(&headers("Bearer secret")).await.unwrap();
        assert_eq!(info.get("scheme"), Some(&Value::from("api_key")));
        assert_eq!(info.get("key_hint"), Some(&Value::from("secr")));

        assert!(auth.authorize(&headers("Bearer wrong")).await.is_none());
        assert!(auth.authorize(&HeaderMap::new()).await.is_none());
    }
}
