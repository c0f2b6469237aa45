//! Method routing.
//!
//! The dispatcher maps method names to [`Route`] components. Requests for
//! unknown methods fail with "method not found"; notifications for unknown
//! methods are logged and dropped.

mod context;
mod paginator;
mod route;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

pub use context::RequestContext;
pub use paginator::{decode_cursor, encode_cursor, paginate, Page};
pub use route::Route;

use crate::protocol::{Notification, Request, RpcError};

/// Method table built from an ordered list of routes.
#[derive(Clone, Default)]
pub struct Dispatcher {
    routes: HashMap<String, Arc<dyn Route>>,
}

impl Dispatcher {
    /// Later routes win when two claim the same method.
    pub fn new(routes: Vec<Arc<dyn Route>>) -> Self {
        let mut dispatcher = Self::default();
        for route in routes {
            dispatcher.register(route);
        }
        dispatcher
    }

    pub fn with_route(mut self, route: Arc<dyn Route>) -> Self {
        self.register(route);
        self
    }

    fn register(&mut self, route: Arc<dyn Route>) {
        for method in route.methods() {
            self.routes.insert((*method).to_string(), Arc::clone(&route));
        }
    }

    pub async fn handle_request(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Value, RpcError> {
        let Some(route) = self.routes.get(&request.method) else {
            return Err(RpcError::method_not_found(&request.method));
        };
        route.handle_request(request, ctx).await
    }

    pub async fn handle_notification(&self, notification: &Notification, ctx: &mut RequestContext) {
        match self.routes.get(&notification.method) {
            Some(route) => route.handle_notification(notification, ctx).await,
            None => debug!(
                method = %notification.method,
                session_id = %ctx.session_id(),
                "no route for notification, dropping"
            ),
        }
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods())
            .finish()
    }
}
