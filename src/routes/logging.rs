use async_trait::async_trait;
use serde_json::{json, Value};

use super::required_str;
use crate::dispatch::{RequestContext, Route};
use crate::protocol::{Request, RpcError};
use crate::session::KEY_LOG_LEVEL;

/// Syslog severities, least severe first.
pub const LOG_LEVELS: &[&str] = &[
    "debug",
    "info",
    "notice",
    "warning",
    "error",
    "critical",
    "alert",
    "emergency",
];

/// `logging/setLevel`: remembers the client's preferred log level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRoute;

#[async_trait]
impl Route for LoggingRoute {
    fn methods(&self) -> &'static [&'static str] {
        &["logging/setLevel"]
    }

    async fn handle_request(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Value, RpcError> {
        let level = required_str(request, "level")?;
        if !LOG_LEVELS.contains(&level) {
            return Err(RpcError::invalid_params(format!("unknown log level `{level}`"))
                .with_data(json!({ "allowed": LOG_LEVELS })));
        }
        ctx.session.set(KEY_LOG_LEVEL, Value::from(level));
        Ok(json!({}))
    }
}
