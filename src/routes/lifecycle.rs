//! `initialize`, `ping` and `notifications/initialized`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::dispatch::{RequestContext, Route};
use crate::protocol::{Notification, Request, RpcError, INITIALIZE_METHOD};
use crate::session::{KEY_CLIENT_INFO, KEY_INITIALIZED, KEY_PROTOCOL_VERSION};

pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[LATEST_PROTOCOL_VERSION, "2024-11-05"];

const PING: &str = "ping";
const INITIALIZED: &str = "notifications/initialized";

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Session handshake.
#[derive(Debug, Clone)]
pub struct LifecycleRoute {
    server_info: ServerInfo,
    capabilities: Value,
    instructions: Option<String>,
}

impl LifecycleRoute {
    pub fn new(server_info: ServerInfo, capabilities: Value) -> Self {
        Self {
            server_info,
            capabilities,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Pick the version to answer with: the client's if supported, else the
    /// latest this server speaks.
    pub fn negotiate(requested: Option<&str>) -> &'static str {
        requested
            .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
            .copied()
            .unwrap_or(LATEST_PROTOCOL_VERSION)
    }

    fn initialize(&self, request: &Request, ctx: &mut RequestContext) -> Value {
        let requested = request.param("protocolVersion").and_then(Value::as_str);
        let version = Self::negotiate(requested);
        let client_info = request.param("clientInfo").cloned().unwrap_or(Value::Null);
        let client_name = client_info
            .get("name")
            .and_then(|name| name.as_str())
            .unwrap_or("unknown");

        info!(
            session_id = %ctx.session_id(),
            protocol_version = version,
            client = client_name,
            "client initializing"
        );

        ctx.session.set(KEY_CLIENT_INFO, client_info);
        ctx.session.set(KEY_PROTOCOL_VERSION, Value::from(version));

        let mut result = json!({
            "protocolVersion": version,
            "capabilities": self.capabilities,
            "serverInfo": self.server_info,
        });
        if let Some(instructions) = &self.instructions {
            result["instructions"] = Value::from(instructions.as_str());
        }
        result
    }
}

impl Default for LifecycleRoute {
    fn default() -> Self {
        Self::new(ServerInfo::default(), json!({}))
    }
}

#[async_trait]
impl Route for LifecycleRoute {
    fn methods(&self) -> &'static [&'static str] {
        &[INITIALIZE_METHOD, PING, INITIALIZED]
    }

    async fn handle_request(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Value, RpcError> {
        match request.method.as_str() {
            INITIALIZE_METHOD => Ok(self.initialize(request, ctx)),
            PING => Ok(json!({})),
            other => Err(RpcError::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, notification: &Notification, ctx: &mut RequestContext) {
        if notification.method == INITIALIZED {
            ctx.session.set(KEY_INITIALIZED, Value::Bool(true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionHandler, Session, SessionId};
    use std::sync::Arc;

    fn ctx() -> RequestContext {
        let session = Session::new(SessionId::new(), Arc::new(MemorySessionHandler::new(60)));
        RequestContext::new(session, None)
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(LifecycleRoute::negotiate(Some("2024-11-05")), "2024-11-05");
        assert_eq!(LifecycleRoute::negotiate(Some("1999-01-01")), LATEST_PROTOCOL_VERSION);
        assert_eq!(LifecycleRoute::negotiate(None), LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_initialize_records_client() {
        let route = LifecycleRoute::new(ServerInfo::default(), json!({"logging": {}}))
            .with_instructions("be nice");
        let mut ctx = ctx();
        let request = Request::new(
            1,
            INITIALIZE_METHOD,
            Some(json!({
                "protocolVersion": "2024-11-05",
                "clientInfo": {"name": "inspector", "version": "1.0"},
                "capabilities": {}
            })),
        );

        let result = route.handle_request(&request, &mut ctx).await.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["capabilities"], json!({"logging": {}}));
        assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(result["instructions"], "be nice");

        assert_eq!(ctx.session.get("client_info.name"), Some(&json!("inspector")));
        assert_eq!(ctx.session.get(KEY_PROTOCOL_VERSION), Some(&json!("2024-11-05")));
    }

    #[tokio::test]
    async fn test_ping_and_initialized() {
        let route = LifecycleRoute::default();
        let mut ctx = ctx();

        let pong = route
            .handle_request(&Request::new(2, PING, None), &mut ctx)
            .await
            .unwrap();
        assert_eq!(pong, json!({}));

        route
            .handle_notification(&Notification::new(INITIALIZED, None), &mut ctx)
            .await;
        assert_eq!(ctx.session.get(KEY_INITIALIZED), Some(&json!(true)));
    }
}
