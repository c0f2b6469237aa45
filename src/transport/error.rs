//! Transport-level failures and their HTTP rendering.

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::protocol::{RequestId, RpcError, INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION};

/// Server-defined JSON-RPC code for an unknown or expired session.
pub const SESSION_NOT_FOUND: i64 = -32001;

/// Failures detected before a message reaches the dispatcher.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    #[error("Not Acceptable: {0}")]
    NotAcceptable(&'static str),

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    /// The body failed envelope parsing.
    #[error("{0}")]
    Protocol(RpcError),

    #[error("Bad Request: {0}")]
    InvalidRequest(String),

    #[error("Bad Request: missing session id")]
    MissingSessionId,

    #[error("Bad Request: initialize must not carry a session id")]
    SessionIdNotAllowed,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Bad Request: request id {0} is already in flight")]
    DuplicateRequestId(RequestId),

    #[error("Conflict: a stream is already open for this session")]
    StreamConflict,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Protocol(_)
            | Self::InvalidRequest(_)
            | Self::MissingSessionId
            | Self::SessionIdNotAllowed
            | Self::DuplicateRequestId(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound | Self::NotFound => StatusCode::NOT_FOUND,
            Self::StreamConflict => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code reported in the body.
    pub fn code(&self) -> i64 {
        match self {
            Self::Protocol(e) => e.code,
            Self::SessionNotFound => SESSION_NOT_FOUND,
            Self::Internal(_) => INTERNAL_ERROR,
            _ => INVALID_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::MethodNotAllowed { allowed } => format!(
                "Method not allowed. Supported methods: {}",
                join_methods(allowed)
            ),
            Self::Protocol(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<RpcError> for TransportError {
    fn from(e: RpcError) -> Self {
        Self::Protocol(e)
    }
}

fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let body = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": null,
            "error": { "code": self.code(), "message": self.message() },
        });
        let mut response = (self.status(), Json(body)).into_response();

        match &self {
            Self::MethodNotAllowed { allowed } => {
                if let Ok(value) = HeaderValue::from_str(&join_methods(allowed)) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
            }
            Self::Unauthorized => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PARSE_ERROR;

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_verbs() {
        let err = TransportError::MethodNotAllowed {
            allowed: vec![Method::GET, Method::POST, Method::DELETE],
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST, DELETE");

        let body = body_of(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert!(body["id"].is_null());
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("GET, POST, DELETE"));
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_code() {
        let response = TransportError::from(RpcError::parse_error("Parse error")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_of(response).await;
        assert_eq!(body["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unauthorized_challenge() {
        let response = TransportError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn test_statuses() {
        assert_eq!(TransportError::NotAcceptable("x").status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            TransportError::UnsupportedMediaType.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(TransportError::SessionNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(TransportError::SessionNotFound.code(), SESSION_NOT_FOUND);
        assert_eq!(TransportError::StreamConflict.status(), StatusCode::CONFLICT);
    }
}
