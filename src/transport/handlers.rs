//! HTTP handlers for the three transport verbs.

use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{debug, info};

use super::sse::sse_body;
use super::{Inbound, StreamableTransport, TransportError, LAST_EVENT_ID_HEADER};
use crate::auth::AuthInfo;
use crate::events::TransportEvent;
use crate::protocol::{Payload, RpcError};
use crate::session::SessionId;

/// Largest POST body accepted.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Routes for the transport's base path.
pub fn router(transport: Arc<StreamableTransport>) -> Router {
    let path = transport.config().path.clone();
    Router::new()
        .route(
            &path,
            get(handle_get)
                .post(handle_post)
                .delete(handle_delete)
                .fallback(method_not_allowed),
        )
        .with_state(transport)
}

/// What the client's `Accept` header allows.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Accepts {
    json: bool,
    event_stream: bool,
}

impl Accepts {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut accepts = Self::default();
        let media_types = headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .filter_map(|part| part.split(';').next())
            .map(|media| media.trim().to_ascii_lowercase());

        for media in media_types {
            match media.as_str() {
                "*/*" => {
                    accepts.json = true;
                    accepts.event_stream = true;
                }
                "application/json" | "application/*" => accepts.json = true,
                "text/event-stream" | "text/*" => accepts.event_stream = true,
                _ => {}
            }
        }
        accepts
    }
}

fn is_json_body(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

fn allowed_methods(transport: &StreamableTransport) -> Vec<Method> {
    if transport.config().stateless {
        vec![Method::POST, Method::DELETE]
    } else {
        vec![Method::GET, Method::POST, Method::DELETE]
    }
}

/// Resolve the session named by the identity header.
async fn existing_session(
    transport: &StreamableTransport,
    headers: &HeaderMap,
) -> Result<SessionId, TransportError> {
    let raw = headers
        .get(&transport.config().session_header)
        .ok_or(TransportError::MissingSessionId)?;
    let id: SessionId = raw
        .to_str()
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or(TransportError::SessionNotFound)?;

    match transport.sessions().get_session(&id).await {
        Ok(Some(_)) => Ok(id),
        Ok(None) => Err(TransportError::SessionNotFound),
        Err(e) => Err(TransportError::Internal(e.to_string())),
    }
}

async fn create_session(
    transport: &StreamableTransport,
    id: &SessionId,
) -> Result<(), TransportError> {
    transport
        .sessions()
        .create_session(id.clone())
        .await
        .map(|_| ())
        .map_err(|e| TransportError::Internal(e.to_string()))
}

pub(super) async fn method_not_allowed(
    State(transport): State<Arc<StreamableTransport>>,
) -> TransportError {
    TransportError::MethodNotAllowed {
        allowed: allowed_methods(&transport),
    }
}

/// `POST`: submit a message or batch.
pub(super) async fn handle_post(
    State(transport): State<Arc<StreamableTransport>>,
    request: Request,
) -> Result<Response, TransportError> {
    let (parts, body) = request.into_parts();
    let config = transport.config().clone();

    let accepts = Accepts::from_headers(&parts.headers);
    if !accepts.json && !accepts.event_stream {
        return Err(TransportError::NotAcceptable(
            "client must accept application/json or text/event-stream",
        ));
    }
    if !is_json_body(&parts.headers) {
        return Err(TransportError::UnsupportedMediaType);
    }

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| RpcError::parse_error(format!("Parse error: {e}")))?;
    let payload = Payload::parse(&bytes)?;
    let auth = parts.extensions.get::<AuthInfo>().cloned();

    let (session_id, established, ephemeral) = if config.stateless {
        let id = SessionId::new();
        create_session(&transport, &id).await?;
        (id, false, true)
    } else if payload.is_initialize() {
        if payload.is_batch() {
            return Err(TransportError::InvalidRequest(
                "initialize must not be part of a batch".into(),
            ));
        }
        if parts.headers.contains_key(&config.session_header) {
            return Err(TransportError::SessionIdNotAllowed);
        }
        let id = SessionId::new();
        create_session(&transport, &id).await?;
        info!(session_id = %id, "client connected");
        transport.events().publish(TransportEvent::ClientConnected {
            session_id: id.clone(),
        });
        (id, true, false)
    } else {
        (existing_session(&transport, &parts.headers).await?, false, false)
    };

    let request_ids = payload.request_ids();
    let batch = payload.is_batch();
    let inbound = Inbound {
        session_id: session_id.clone(),
        messages: payload.into_messages(),
        auth,
        ephemeral,
    };

    if request_ids.is_empty() {
        transport.enqueue(inbound)?;
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let streaming = accepts.event_stream && !(config.direct_response && accepts.json);
    debug!(
        session_id = %session_id,
        requests = request_ids.len(),
        streaming,
        "accepted requests"
    );

    let outcome = if streaming {
        answer_over_stream(&transport, inbound, request_ids).await
    } else {
        answer_directly(&transport, inbound, request_ids, batch).await
    };

    let mut response = match outcome {
        Ok(response) => response,
        Err(e) => {
            if ephemeral {
                transport.sessions().delete_session(&session_id).await;
            }
            return Err(e);
        }
    };

    if established {
        if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
            response
                .headers_mut()
                .insert(config.session_header.clone(), value);
        }
    }
    Ok(response)
}

async fn answer_directly(
    transport: &Arc<StreamableTransport>,
    inbound: Inbound,
    request_ids: Vec<crate::protocol::RequestId>,
    batch: bool,
) -> Result<Response, TransportError> {
    let completion = transport.register_exchange(&inbound.session_id, request_ids, batch)?;
    transport.enqueue(inbound)?;
    let body = completion
        .await
        .map_err(|_| TransportError::Internal("exchange abandoned".into()))?;
    Ok(Json(body).into_response())
}

async fn answer_over_stream(
    transport: &Arc<StreamableTransport>,
    inbound: Inbound,
    request_ids: Vec<crate::protocol::RequestId>,
) -> Result<Response, TransportError> {
    let frames = transport.register_stream(&inbound.session_id, request_ids)?;
    transport.enqueue(inbound)?;
    Ok(sse_body(frames, transport.config().keep_alive).into_response())
}

/// `GET`: open the session's push stream.
pub(super) async fn handle_get(
    State(transport): State<Arc<StreamableTransport>>,
    headers: HeaderMap,
) -> Result<Response, TransportError> {
    if transport.config().stateless {
        return Err(TransportError::MethodNotAllowed {
            allowed: allowed_methods(&transport),
        });
    }
    if !Accepts::from_headers(&headers).event_stream {
        return Err(TransportError::NotAcceptable(
            "client must accept text/event-stream",
        ));
    }

    let session_id = existing_session(&transport, &headers).await?;
    let last_event_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let frames = transport.open_push_stream(&session_id, last_event_id)?;
    debug!(session_id = %session_id, "push stream opened");
    Ok(sse_body(frames, transport.config().keep_alive).into_response())
}

/// `DELETE`: end the session.
pub(super) async fn handle_delete(
    State(transport): State<Arc<StreamableTransport>>,
    headers: HeaderMap,
) -> Result<StatusCode, TransportError> {
    if transport.config().stateless {
        return Ok(StatusCode::NO_CONTENT);
    }

    let session_id = existing_session(&transport, &headers).await?;
    transport.close_session_streams(&session_id);
    if !transport.sessions().delete_session(&session_id).await {
        return Err(TransportError::Internal("failed to delete session".into()));
    }

    info!(session_id = %session_id, "client disconnected");
    transport
        .events()
        .publish(TransportEvent::ClientDisconnected { session_id });
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_accept_parsing() {
        let both = Accepts::from_headers(&headers(&[(
            "accept",
            "application/json, text/event-stream;q=0.9",
        )]));
        assert!(both.json && both.event_stream);

        let wildcard = Accepts::from_headers(&headers(&[("accept", "*/*")]));
        assert!(wildcard.json && wildcard.event_stream);

        let html = Accepts::from_headers(&headers(&[("accept", "text/html")]));
        assert_eq!(html, Accepts::default());

        let split = Accepts::from_headers(&headers(&[
            ("accept", "application/json"),
            ("accept", "text/event-stream"),
        ]));
        assert!(split.json && split.event_stream);

        assert_eq!(Accepts::from_headers(&HeaderMap::new()), Accepts::default());
    }

    #[test]
    fn test_content_type() {
        assert!(is_json_body(&headers(&[("content-type", "application/json")])));
        assert!(is_json_body(&headers(&[(
            "content-type",
            "application/json; charset=utf-8"
        )])));
        assert!(!is_json_body(&headers(&[("content-type", "text/plain")])));
        assert!(!is_json_body(&HeaderMap::new()));
    }
}
