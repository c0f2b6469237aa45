//! Built-in route components.

mod catalog;
mod lifecycle;
mod logging;
mod subscriptions;

pub use catalog::{Catalog, CatalogKind, CatalogRoute, StaticCatalog};
pub use lifecycle::{
    LifecycleRoute, ServerInfo, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
pub use logging::{LoggingRoute, LOG_LEVELS};
pub use subscriptions::SubscriptionRoute;

use serde_json::Value;

use crate::protocol::{Request, RpcError};

/// Fetch a required string parameter.
fn required_str<'a>(request: &'a Request, name: &str) -> Result<&'a str, RpcError> {
    request
        .param(name)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("missing string parameter `{name}`")))
}
