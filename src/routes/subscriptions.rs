use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::required_str;
use crate::dispatch::{RequestContext, Route};
use crate::protocol::{Request, RpcError};
use crate::subscription::SubscriptionManager;

const SUBSCRIBE: &str = "resources/subscribe";
const UNSUBSCRIBE: &str = "resources/unsubscribe";

/// `resources/subscribe` and `resources/unsubscribe`.
#[derive(Debug, Clone)]
pub struct SubscriptionRoute {
    subscriptions: Arc<SubscriptionManager>,
}

impl SubscriptionRoute {
    pub fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self { subscriptions }
    }
}

#[async_trait]
impl Route for SubscriptionRoute {
    fn methods(&self) -> &'static [&'static str] {
        &[SUBSCRIBE, UNSUBSCRIBE]
    }

    async fn handle_request(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Value, RpcError> {
        let uri = required_str(request, "uri")?;
        let outcome = if request.method == SUBSCRIBE {
            self.subscriptions.subscribe(ctx.session_id(), uri)
        } else {
            self.subscriptions.unsubscribe(ctx.session_id(), uri)
        };
        outcome.map_err(|e| RpcError::internal_error(e.to_string()))?;
        Ok(json!({}))
    }
}
