//! # streamable-rpc
//!
//! Session-aware JSON-RPC 2.0 server runtime with a streamable HTTP
//! transport.
//!
//! A single endpoint accepts `POST` (messages and batches), `GET` (a
//! server-push event stream) and `DELETE` (end a session). Responses come
//! back either as plain JSON or as a Server-Sent Events stream that closes
//! once every request in the batch has been answered.
//!
//! ## Features
//!
//! - **Sessions**: identity header, TTL expiry with a background collector,
//!   pluggable storage (in memory or any [`Cache`])
//! - **Dispatch**: method routing through [`Route`] implementations
//! - **Built-in methods**: lifecycle, logging level, paginated catalogs and
//!   resource subscriptions
//! - **Resumable push streams**: optional [`EventStore`] replay via
//!   `Last-Event-ID`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use streamable_rpc::{CatalogKind, Server, StaticCatalog};
//!
//! #[tokio::main]
//! async fn main() -> streamable_rpc::Result<()> {
//!     streamable_rpc::logging::try_init().ok();
//!
//!     let catalog = StaticCatalog::new().with(
//!         CatalogKind::Tools,
//!         json!({ "name": "echo", "inputSchema": { "type": "object" } }),
//!     );
//!
//!     let server = Server::builder().catalog(Arc::new(catalog)).build();
//!     server
//!         .serve("127.0.0.1:3000".parse().unwrap(), async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_store;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod session;
pub mod subscription;
pub mod transport;

// Re-export commonly used types
pub use auth::{ApiKeyAuthorizer, AuthConfig, AuthInfo, Authorizer};
pub use cache::{Cache, MemoryCache};
pub use config::{Config, ConfigError, SessionBackend};
pub use dispatch::{Dispatcher, RequestContext, Route};
pub use error::{Error, Result};
pub use event_store::{EventStore, InMemoryEventStore};
pub use events::{EventBus, TransportEvent};
pub use protocol::{Message, Notification, Payload, Request, RequestId, Response, RpcError};
pub use routes::{Catalog, CatalogKind, ServerInfo, StaticCatalog};
pub use server::{Server, ServerBuilder};
pub use session::{
    CacheSessionHandler, MemorySessionHandler, Session, SessionConfig, SessionHandler, SessionId,
    SessionManager,
};
pub use subscription::SubscriptionManager;
pub use transport::{StreamableTransport, TransportConfig, TransportError};
