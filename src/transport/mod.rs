//! Streamable HTTP transport.
//!
//! One base path serves three verbs:
//! - `POST` submits a message or batch. Requests are answered either with a
//!   plain JSON body (direct mode) or over a dedicated SSE sub-stream that
//!   closes once every request in the body has been answered.
//! - `GET` opens the session's long-lived push stream.
//! - `DELETE` ends the session and closes its streams.
//!
//! Every HTTP exchange waiting on responses is registered in the
//! correlation tables owned by [`StreamableTransport`] before its messages
//! are handed to the dispatcher worker. Responses find their way back by
//! `(session id, request id)`.

mod config;
mod error;
mod handlers;
mod sse;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub use config::{
    TransportConfig, DEFAULT_KEEP_ALIVE, DEFAULT_PATH, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SESSION_HEADER, DEFAULT_STREAM_BUFFER, LAST_EVENT_ID_HEADER,
};
pub use error::{TransportError, SESSION_NOT_FOUND};
pub use handlers::router;
pub use sse::{Frame, MESSAGE_EVENT};

use crate::auth::AuthInfo;
use crate::dispatch::{Dispatcher, RequestContext};
use crate::event_store::EventStore;
use crate::events::{EventBus, TransportEvent};
use crate::protocol::{Message, Notification, RequestId, Response, RpcError};
use crate::session::{SessionId, SessionManager};

pub const TIMEOUT_MESSAGE: &str = "Request timed out";

type ExchangeId = String;
type StreamId = String;

/// Messages handed from the HTTP side to the dispatcher worker.
#[derive(Debug)]
struct Inbound {
    session_id: SessionId,
    messages: Vec<Message>,
    auth: Option<AuthInfo>,
    /// Delete the session once processed (stateless mode).
    ephemeral: bool,
}

/// A direct-mode POST waiting for its JSON body.
struct PendingExchange {
    session_id: SessionId,
    /// Request ids in body order.
    expected: Vec<RequestId>,
    batch: bool,
    collected: HashMap<RequestId, Response>,
    completion: oneshot::Sender<Value>,
    timer: Option<AbortHandle>,
}

impl PendingExchange {
    fn is_complete(&self) -> bool {
        self.collected.len() >= self.expected.len()
    }

    /// Consume the exchange and hand its body to the waiting caller.
    fn resolve(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let mut responses: Vec<Value> = self
            .expected
            .iter()
            .filter_map(|id| self.collected.remove(id))
            .map(|response| serde_json::to_value(response).unwrap_or(Value::Null))
            .collect();

        let body = if self.batch {
            Value::Array(responses)
        } else {
            responses.pop().unwrap_or(Value::Null)
        };
        // The caller may have gone away.
        let _ = self.completion.send(body);
    }
}

/// A POST answered over its own SSE stream.
struct ActiveStream {
    session_id: SessionId,
    expected: usize,
    fulfilled: usize,
    outstanding: HashSet<RequestId>,
    tx: mpsc::Sender<Frame>,
    timer: Option<AbortHandle>,
}

/// The per-session long-lived GET stream.
struct PushStream {
    tx: mpsc::Sender<Frame>,
    /// False while replay and queue flush are still running.
    live: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Exchange(ExchangeId),
    Stream(StreamId),
}

#[derive(Default)]
struct Correlation {
    exchanges: HashMap<ExchangeId, PendingExchange>,
    streams: HashMap<StreamId, ActiveStream>,
    push_streams: HashMap<SessionId, PushStream>,
    routes: HashMap<(SessionId, RequestId), Target>,
}

impl Correlation {
    fn claim_ids(
        &mut self,
        session_id: &SessionId,
        ids: &[RequestId],
        target: Target,
    ) -> Result<(), TransportError> {
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id) || self.routes.contains_key(&(session_id.clone(), id.clone())) {
                return Err(TransportError::DuplicateRequestId(id.clone()));
            }
        }
        for id in ids {
            self.routes
                .insert((session_id.clone(), id.clone()), target.clone());
        }
        Ok(())
    }

    fn release_ids<'a>(
        &mut self,
        session_id: &SessionId,
        ids: impl IntoIterator<Item = &'a RequestId>,
    ) {
        for id in ids {
            self.routes.remove(&(session_id.clone(), id.clone()));
        }
    }
}

/// Correlation engine between HTTP exchanges and dispatched messages.
pub struct StreamableTransport {
    config: TransportConfig,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    events: EventBus,
    event_store: Option<Arc<dyn EventStore>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    worker: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    state: Mutex<Correlation>,
}

impl StreamableTransport {
    pub fn new(
        config: TransportConfig,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<Dispatcher>,
        events: EventBus,
    ) -> Self {
        let (inbound, rx) = mpsc::unbounded_channel();
        Self {
            config,
            sessions,
            dispatcher,
            events,
            event_store: None,
            inbound,
            worker: Mutex::new(Some(rx)),
            state: Mutex::new(Correlation::default()),
        }
    }

    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn lock(&self) -> Result<MutexGuard<'_, Correlation>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Internal("correlation state poisoned".into()))
    }

    /// Start the dispatcher worker if it is not running yet.
    pub fn start(self: &Arc<Self>) {
        let Some(mut rx) = self.worker.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                let Some(transport) = weak.upgrade() else {
                    break;
                };
                tokio::spawn(transport.process(inbound));
            }
            debug!("dispatcher worker stopped");
        });
    }

    fn enqueue(self: &Arc<Self>, inbound: Inbound) -> Result<(), TransportError> {
        self.start();
        self.inbound
            .send(inbound)
            .map_err(|_| TransportError::Internal("dispatcher worker is gone".into()))
    }

    /// Register a direct-mode exchange for `ids` and return its completion.
    fn register_exchange(
        self: &Arc<Self>,
        session_id: &SessionId,
        ids: Vec<RequestId>,
        batch: bool,
    ) -> Result<oneshot::Receiver<Value>, TransportError> {
        let exchange_id: ExchangeId = Uuid::new_v4().simple().to_string();
        let (completion, rx) = oneshot::channel();

        let mut state = self.lock()?;
        state.claim_ids(session_id, &ids, Target::Exchange(exchange_id.clone()))?;
        let timer = self.spawn_timer(Target::Exchange(exchange_id.clone()));
        state.exchanges.insert(
            exchange_id,
            PendingExchange {
                session_id: session_id.clone(),
                expected: ids,
                batch,
                collected: HashMap::new(),
                completion,
                timer: Some(timer),
            },
        );
        Ok(rx)
    }

    /// Register a streaming-mode exchange for `ids` and return its frames.
    fn register_stream(
        self: &Arc<Self>,
        session_id: &SessionId,
        ids: Vec<RequestId>,
    ) -> Result<mpsc::Receiver<Frame>, TransportError> {
        let stream_id: StreamId = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));

        let mut state = self.lock()?;
        state.claim_ids(session_id, &ids, Target::Stream(stream_id.clone()))?;
        let timer = self.spawn_timer(Target::Stream(stream_id.clone()));
        state.streams.insert(
            stream_id,
            ActiveStream {
                session_id: session_id.clone(),
                expected: ids.len(),
                fulfilled: 0,
                outstanding: ids.into_iter().collect(),
                tx,
                timer: Some(timer),
            },
        );
        Ok(rx)
    }

    fn spawn_timer(self: &Arc<Self>, target: Target) -> AbortHandle {
        let transport = Arc::downgrade(self);
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(transport) = transport.upgrade() {
                transport.expire(target).await;
            }
        })
        .abort_handle()
    }

    /// Resolve whatever is still outstanding on `target` with a synthesized
    /// internal error. No-op if the target already completed.
    async fn expire(&self, target: Target) {
        match target {
            Target::Exchange(exchange_id) => {
                let mut exchange = {
                    let Ok(mut state) = self.lock() else { return };
                    let Some(mut exchange) = state.exchanges.remove(&exchange_id) else {
                        return;
                    };
                    let session_id = exchange.session_id.clone();
                    state.release_ids(&session_id, &exchange.expected);
                    // Running inside the timer task; nothing to cancel.
                    exchange.timer = None;
                    exchange
                };
                let missing: Vec<RequestId> = exchange
                    .expected
                    .iter()
                    .filter(|id| !exchange.collected.contains_key(*id))
                    .cloned()
                    .collect();
                warn!(
                    session_id = %exchange.session_id,
                    missing = missing.len(),
                    "exchange timed out"
                );
                for id in missing {
                    exchange.collected.insert(id.clone(), timeout_response(id));
                }
                exchange.resolve();
            }
            Target::Stream(stream_id) => {
                let stream = {
                    let Ok(mut state) = self.lock() else { return };
                    let Some(stream) = state.streams.remove(&stream_id) else {
                        return;
                    };
                    let session_id = stream.session_id.clone();
                    state.release_ids(&session_id, &stream.outstanding);
                    stream
                };
                warn!(
                    session_id = %stream.session_id,
                    missing = stream.outstanding.len(),
                    "stream exchange timed out"
                );
                for id in stream.outstanding {
                    let frame = self.frame_for(&stream_id, &timeout_response(id)).await;
                    if stream.tx.send(frame).await.is_err() {
                        debug!(stream_id = %stream_id, "stream closed before timeout frame");
                        break;
                    }
                }
            }
        }
    }

    /// Route a response produced by the dispatcher to whichever exchange is
    /// waiting for it.
    pub async fn deliver(&self, session_id: &SessionId, response: Response) {
        let Some(request_id) = response.id.clone() else {
            debug!(session_id = %session_id, "dropping response without id");
            return;
        };

        enum Outcome {
            Nothing,
            Resolved(PendingExchange),
            Write {
                stream_id: StreamId,
                tx: mpsc::Sender<Frame>,
            },
        }

        let outcome = {
            let Ok(mut state) = self.lock() else { return };
            let key = (session_id.clone(), request_id.clone());
            match state.routes.remove(&key) {
                None => Outcome::Nothing,
                Some(Target::Exchange(exchange_id)) => {
                    let complete = match state.exchanges.get_mut(&exchange_id) {
                        Some(exchange) => {
                            exchange.collected.insert(request_id.clone(), response.clone());
                            exchange.is_complete()
                        }
                        None => false,
                    };
                    if complete {
                        state
                            .exchanges
                            .remove(&exchange_id)
                            .map_or(Outcome::Nothing, Outcome::Resolved)
                    } else {
                        Outcome::Nothing
                    }
                }
                Some(Target::Stream(stream_id)) => {
                    let mut writer = None;
                    let mut finished = false;
                    if let Some(stream) = state.streams.get_mut(&stream_id) {
                        if stream.outstanding.remove(&request_id) {
                            stream.fulfilled += 1;
                            finished = stream.fulfilled >= stream.expected;
                            writer = Some(stream.tx.clone());
                        }
                    }
                    if finished {
                        if let Some(mut done) = state.streams.remove(&stream_id) {
                            if let Some(timer) = done.timer.take() {
                                timer.abort();
                            }
                        }
                    }
                    writer.map_or(Outcome::Nothing, |tx| Outcome::Write { stream_id, tx })
                }
            }
        };

        match outcome {
            Outcome::Nothing => {
                debug!(
                    session_id = %session_id,
                    request_id = %request_id,
                    "no exchange waiting for response"
                );
            }
            Outcome::Resolved(exchange) => exchange.resolve(),
            Outcome::Write { stream_id, tx } => {
                let frame = self.frame_for(&stream_id, &response).await;
                if tx.send(frame).await.is_err() {
                    debug!(stream_id = %stream_id, "stream write failed, client gone");
                }
            }
        }
    }

    /// Serialize a message into a frame, recording it for replay when an
    /// event store is configured.
    async fn frame_for<T: serde::Serialize>(&self, stream_id: &str, message: &T) -> Frame {
        let data = serde_json::to_string(message).unwrap_or_else(|_| "null".to_string());
        let event_id = match &self.event_store {
            None => None,
            Some(store) => match store.store_event(stream_id, &data).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(stream_id, error = %e, "failed to record event");
                    None
                }
            },
        };
        Frame::new(data).with_id(event_id)
    }

    /// Push a server-initiated message to a session.
    ///
    /// Goes out on the GET stream if one is live, otherwise into the
    /// session's message queue for the next GET to flush.
    pub async fn send_message(&self, session_id: &SessionId, notification: &Notification) {
        let tx = self.lock().ok().and_then(|state| {
            state
                .push_streams
                .get(session_id)
                .filter(|push| push.live && !push.tx.is_closed())
                .map(|push| push.tx.clone())
        });

        if let Some(tx) = tx {
            let frame = self.frame_for(session_id.as_str(), notification).await;
            if tx.send(frame).await.is_ok() {
                return;
            }
            debug!(session_id = %session_id, "push stream gone, queueing message");
        }

        match serde_json::to_string(notification) {
            Ok(text) => self.sessions.queue_message(session_id, text).await,
            Err(e) => warn!(session_id = %session_id, error = %e, "unserializable notification"),
        }
    }

    /// Open the GET stream for a session.
    ///
    /// A second GET while the first is still connected is a conflict; a
    /// stream whose client went away is replaced.
    pub fn open_push_stream(
        self: &Arc<Self>,
        session_id: &SessionId,
        last_event_id: Option<String>,
    ) -> Result<mpsc::Receiver<Frame>, TransportError> {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        {
            let mut state = self.lock()?;
            if let Some(existing) = state.push_streams.get(session_id) {
                if !existing.tx.is_closed() {
                    return Err(TransportError::StreamConflict);
                }
            }
            state.push_streams.insert(
                session_id.clone(),
                PushStream {
                    tx: tx.clone(),
                    live: false,
                },
            );
        }

        let transport = Arc::clone(self);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            transport.prime_push_stream(&session_id, tx, last_event_id).await;
        });
        Ok(rx)
    }

    /// Replay missed events, flush the queue, then mark the stream live.
    async fn prime_push_stream(
        &self,
        session_id: &SessionId,
        tx: mpsc::Sender<Frame>,
        last_event_id: Option<String>,
    ) {
        if let (Some(store), Some(marker)) = (&self.event_store, last_event_id) {
            let mut replay = Vec::new();
            let outcome = store
                .replay_events_after(&marker, &mut |event_id: String, data: String| {
                    replay.push(Frame::new(data).with_id(Some(event_id)));
                })
                .await;
            match outcome {
                Ok(Some(stream_id)) => {
                    debug!(
                        session_id = %session_id,
                        stream_id = %stream_id,
                        count = replay.len(),
                        "replaying events"
                    );
                }
                Ok(None) => debug!(session_id = %session_id, "unknown replay marker"),
                Err(e) => warn!(session_id = %session_id, error = %e, "event replay failed"),
            }
            for frame in replay {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }

        if !self.flush_queue(session_id, &tx).await {
            return;
        }

        if let Ok(mut state) = self.lock() {
            if let Some(push) = state.push_streams.get_mut(session_id) {
                if push.tx.same_channel(&tx) {
                    push.live = true;
                }
            }
        }

        // Anything queued while we were flushing.
        self.flush_queue(session_id, &tx).await;
    }

    /// Returns `false` if the client went away.
    async fn flush_queue(&self, session_id: &SessionId, tx: &mpsc::Sender<Frame>) -> bool {
        for text in self.sessions.dequeue_messages(session_id).await {
            let frame = match &self.event_store {
                None => Frame::new(text),
                Some(store) => {
                    let event_id = store.store_event(session_id.as_str(), &text).await.ok();
                    Frame::new(text).with_id(event_id)
                }
            };
            if tx.send(frame).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Close every stream owned by a session. Returns how many were closed.
    pub fn close_session_streams(&self, session_id: &SessionId) -> usize {
        let Ok(mut state) = self.lock() else { return 0 };

        let owned: Vec<StreamId> = state
            .streams
            .iter()
            .filter(|(_, stream)| &stream.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut closed = 0;
        for stream_id in owned {
            if let Some(mut stream) = state.streams.remove(&stream_id) {
                if let Some(timer) = stream.timer.take() {
                    timer.abort();
                }
                state.release_ids(session_id, &stream.outstanding);
                closed += 1;
            }
        }
        if state.push_streams.remove(session_id).is_some() {
            closed += 1;
        }

        if closed > 0 {
            debug!(session_id = %session_id, closed, "closed session streams");
        }
        closed
    }

    pub fn pending_exchanges(&self) -> usize {
        self.lock().map(|s| s.exchanges.len()).unwrap_or(0)
    }

    pub fn active_streams(&self) -> usize {
        self.lock().map(|s| s.streams.len()).unwrap_or(0)
    }

    pub fn has_push_stream(&self, session_id: &SessionId) -> bool {
        self.lock()
            .map(|s| s.push_streams.contains_key(session_id))
            .unwrap_or(false)
    }

    /// Dispatch one inbound body. Runs on its own task.
    async fn process(self: Arc<Self>, inbound: Inbound) {
        let Inbound {
            session_id,
            messages,
            auth,
            ephemeral,
        } = inbound;

        // Held until the final save so queued pushes and concurrent bodies
        // for this session are not overwritten.
        let _guard = self.sessions.lock_session(&session_id).await;
        let session = match self.sessions.get_session(&session_id).await {
            Ok(Some(session)) => session,
            outcome => {
                if let Err(e) = outcome {
                    warn!(session_id = %session_id, error = %e, "failed to load session");
                }
                for request in messages.iter().filter_map(Message::as_request) {
                    let error = RpcError::internal_error("Session is no longer available");
                    self.deliver(&session_id, Response::error(Some(request.id.clone()), error))
                        .await;
                }
                return;
            }
        };

        self.events.publish(TransportEvent::Message {
            session_id: session_id.clone(),
            payload: serde_json::to_value(&messages).unwrap_or(Value::Null),
        });

        let mut ctx = RequestContext::new(session, auth);
        for message in messages {
            match message {
                Message::Request(request) => {
                    let response = match self.dispatcher.handle_request(&request, &mut ctx).await {
                        Ok(result) => Response::success(request.id.clone(), result),
                        Err(error) => Response::error(Some(request.id.clone()), error),
                    };
                    // Persist before answering so the client's next request
                    // sees the changes.
                    self.save(&mut ctx).await;
                    self.deliver(&session_id, response).await;
                }
                Message::Notification(notification) => {
                    self.dispatcher
                        .handle_notification(&notification, &mut ctx)
                        .await;
                }
                Message::Response(response) => {
                    debug!(session_id = %session_id, id = ?response.id, "ignoring client response");
                }
            }
        }
        self.save(&mut ctx).await;

        if ephemeral {
            self.sessions.delete_session(&session_id).await;
        }
    }

    async fn save(&self, ctx: &mut RequestContext) {
        if !ctx.session.is_dirty() {
            return;
        }
        if let Err(e) = ctx.session.save().await {
            warn!(session_id = %ctx.session_id(), error = %e, "failed to save session");
            self.events.publish(TransportEvent::Error {
                session_id: Some(ctx.session_id().clone()),
                message: format!("failed to save session: {e}"),
            });
        }
    }
}

fn timeout_response(id: RequestId) -> Response {
    Response::error(Some(id), RpcError::internal_error(TIMEOUT_MESSAGE))
}
