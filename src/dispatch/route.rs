use async_trait::async_trait;
use serde_json::Value;

use super::RequestContext;
use crate::protocol::{Notification, Request, RpcError};

/// A component owning one or more protocol methods.
#[async_trait]
pub trait Route: Send + Sync {
    /// Method names this route answers.
    fn methods(&self) -> &'static [&'static str];

    async fn handle_request(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Value, RpcError>;

    async fn handle_notification(&self, _notification: &Notification, _ctx: &mut RequestContext) {}
}
