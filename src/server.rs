//! Server wiring.
//!
//! [`Server`] bundles the session manager, dispatcher, subscriptions, event
//! bus and transport, and exposes them as an axum router.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{http::HeaderName, middleware, routing::get, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer, ExposeHeaders},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::auth::{auth_middleware, Authorizer};
use crate::dispatch::{Dispatcher, Route};
use crate::event_store::EventStore;
use crate::events::{EventBus, TransportEvent};
use crate::protocol::Notification;
use crate::routes::{
    Catalog, CatalogRoute, LifecycleRoute, LoggingRoute, ServerInfo, StaticCatalog,
    SubscriptionRoute, LOG_LEVELS,
};
use crate::session::{
    MemorySessionHandler, SessionConfig, SessionHandler, SessionId, SessionManager, KEY_LOG_LEVEL,
};
use crate::subscription::SubscriptionManager;
use crate::transport::{self, StreamableTransport, TransportConfig, TransportError};
use crate::Result;

pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

async fn not_found() -> TransportError {
    TransportError::NotFound
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    transport: TransportConfig,
    session: SessionConfig,
    handler: Option<Arc<dyn SessionHandler>>,
    catalog: Arc<dyn Catalog>,
    page_limit: usize,
    server_info: ServerInfo,
    instructions: Option<String>,
    routes: Vec<Arc<dyn Route>>,
    event_store: Option<Arc<dyn EventStore>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            handler: None,
            catalog: Arc::new(StaticCatalog::new()),
            page_limit: DEFAULT_PAGE_LIMIT,
            server_info: ServerInfo::default(),
            instructions: None,
            routes: Vec::new(),
            event_store: None,
            authorizer: None,
        }
    }
}

impl ServerBuilder {
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Session storage. Defaults to an in-process map.
    pub fn session_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_info = ServerInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Extra route. Registered after the built-ins, so it can take over
    /// their methods.
    pub fn route(mut self, route: Arc<dyn Route>) -> Self {
        self.routes.push(route);
        self
    }

    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn build(self) -> Server {
        let events = EventBus::new();
        let handler: Arc<dyn SessionHandler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(MemorySessionHandler::new(self.session.ttl.as_secs())),
        };
        let sessions = Arc::new(SessionManager::new(handler, events.clone(), self.session));
        let subscriptions = Arc::new(SubscriptionManager::new());

        let mut lifecycle = LifecycleRoute::new(self.server_info, capabilities());
        if let Some(instructions) = self.instructions {
            lifecycle = lifecycle.with_instructions(instructions);
        }

        let mut routes: Vec<Arc<dyn Route>> = vec![
            Arc::new(lifecycle),
            Arc::new(LoggingRoute),
            Arc::new(CatalogRoute::new(self.catalog, self.page_limit)),
            Arc::new(SubscriptionRoute::new(Arc::clone(&subscriptions))),
        ];
        routes.extend(self.routes);
        let dispatcher = Arc::new(Dispatcher::new(routes));

        let mut transport = StreamableTransport::new(
            self.transport,
            Arc::clone(&sessions),
            Arc::clone(&dispatcher),
            events.clone(),
        );
        if let Some(store) = self.event_store {
            transport = transport.with_event_store(store);
        }

        Server {
            sessions,
            dispatcher,
            subscriptions,
            events,
            transport: Arc::new(transport),
            authorizer: self.authorizer,
            listener: Mutex::new(None),
        }
    }
}

fn capabilities() -> Value {
    json!({
        "logging": {},
        "tools": { "listChanged": false },
        "resources": { "subscribe": true, "listChanged": false },
        "prompts": { "listChanged": false },
    })
}

/// A fully wired server.
pub struct Server {
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<SubscriptionManager>,
    events: EventBus,
    transport: Arc<StreamableTransport>,
    authorizer: Option<Arc<dyn Authorizer>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn transport(&self) -> &Arc<StreamableTransport> {
        &self.transport
    }

    /// Start background work: the dispatcher worker, the session GC timer
    /// and the lifecycle listener. Safe to call more than once.
    pub fn start(&self) {
        self.transport.start();
        self.sessions.start_gc_timer();

        let Ok(mut slot) = self.listener.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let mut rx = self.events.subscribe();
        let subscriptions = Arc::clone(&self.subscriptions);
        let transport = Arc::clone(&self.transport);
        *slot = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TransportEvent::SessionDeleted { session_id }) => {
                        subscriptions.remove_session(&session_id);
                        transport.close_session_streams(&session_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "lifecycle listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Stop background work started by [`Server::start`].
    pub fn stop(&self) {
        self.sessions.stop_gc_timer();
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    /// The complete HTTP surface.
    pub fn router(&self) -> Router {
        let session_header = self.transport.config().session_header.clone();
        let mut router = Router::new()
            .route("/health", get(health))
            .merge(transport::router(Arc::clone(&self.transport)))
            .fallback(not_found);

        if let Some(authorizer) = &self.authorizer {
            router = router.layer(middleware::from_fn_with_state(
                Arc::clone(authorizer),
                auth_middleware,
            ));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors(session_header)),
        )
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(&self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(
            addr = %local,
            path = %self.transport.config().path,
            "streamable-rpc listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.stop();
        info!("server stopped");
        Ok(())
    }

    /// Push a server-initiated notification to one session.
    pub async fn send_notification(&self, session_id: &SessionId, notification: &Notification) {
        self.transport.send_message(session_id, notification).await;
    }

    /// Send a `notifications/message` log entry, honoring the level the
    /// client chose with `logging/setLevel`. Returns whether it was sent.
    pub async fn send_log(&self, session_id: &SessionId, level: &str, data: Value) -> bool {
        let Some(rank) = LOG_LEVELS.iter().position(|l| *l == level) else {
            warn!(level, "unknown log level");
            return false;
        };

        let threshold = match self.sessions.get_session(session_id).await {
            Ok(Some(session)) => session
                .get(KEY_LOG_LEVEL)
                .and_then(Value::as_str)
                .and_then(|chosen| LOG_LEVELS.iter().position(|l| *l == chosen))
                .unwrap_or(0),
            _ => return false,
        };
        if rank < threshold {
            return false;
        }

        let notification = Notification::new(
            "notifications/message",
            Some(json!({ "level": level, "data": data })),
        );
        self.transport.send_message(session_id, &notification).await;
        true
    }

    /// Tell every subscribed session that `uri` changed. Returns how many
    /// sessions were notified.
    pub async fn notify_resource_updated(&self, uri: &str) -> usize {
        let subscribers = self.subscriptions.subscribers(uri);
        let notification = Notification::new(
            "notifications/resources/updated",
            Some(json!({ "uri": uri })),
        );
        for session_id in &subscribers {
            self.transport.send_message(session_id, &notification).await;
        }
        debug!(uri, sessions = subscribers.len(), "resource update sent");
        subscribers.len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn cors(session_header: HeaderName) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(ExposeHeaders::list([session_header]))
}
