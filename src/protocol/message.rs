//! JSON-RPC 2.0 envelopes and batch parsing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the session-establishing request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Request identifier, either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for RequestId {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Look up a named parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|params| params.get(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A response carries exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Any single JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Classify and decode a single JSON value.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Object(object) = value else {
            return Err(RpcError::invalid_request("Invalid Request: message must be an object"));
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(RpcError::invalid_request(
                "Invalid Request: jsonrpc version must be \"2.0\"",
            ));
        }

        if object.contains_key("method") {
            if !object.get("method").is_some_and(Value::is_string) {
                return Err(RpcError::invalid_request("Invalid Request: method must be a string"));
            }
            let has_id = object.get("id").is_some_and(|id| !id.is_null());
            return if has_id {
                decode::<Request>(object).map(Self::Request)
            } else {
                decode::<Notification>(object).map(Self::Notification)
            };
        }

        if object.contains_key("result") || object.contains_key("error") {
            return decode::<Response>(object).map(Self::Response);
        }

        Err(RpcError::invalid_request("Invalid Request: unrecognized message shape"))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Self::Request(request) => Some(request),
            _ => None,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(object: Map<String, Value>) -> Result<T, RpcError> {
    serde_json::from_value(Value::Object(object))
        .map_err(|e| RpcError::invalid_request(format!("Invalid Request: {e}")))
}

/// The body of one POST: a single message or a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Message),
    Batch(Vec<Message>),
}

impl Payload {
    /// Parse a raw HTTP body.
    ///
    /// Any malformed entry rejects the whole body; route-level failures are
    /// reported per request later and never here.
    pub fn parse(body: &[u8]) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| RpcError::parse_error(format!("Parse error: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(RpcError::invalid_request("Invalid Request: empty batch"));
                }
                items
                    .into_iter()
                    .map(Message::from_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Batch)
            }
            other => Message::from_value(other).map(Self::Single),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Single(message) => std::slice::from_ref(message),
            Self::Batch(messages) => messages,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Single(message) => vec![message],
            Self::Batch(messages) => messages,
        }
    }

    /// Ids of every addressable request, in body order.
    pub fn request_ids(&self) -> Vec<RequestId> {
        self.messages()
            .iter()
            .filter_map(Message::as_request)
            .map(|request| request.id.clone())
            .collect()
    }

    pub fn has_requests(&self) -> bool {
        self.messages().iter().any(|m| m.as_request().is_some())
    }

    /// Whether the body contains the session-establishing request.
    pub fn is_initialize(&self) -> bool {
        self.messages()
            .iter()
            .filter_map(Message::as_request)
            .any(|request| request.method == INITIALIZE_METHOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::{INVALID_REQUEST, PARSE_ERROR};
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let payload =
            Payload::parse(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        let Payload::Single(Message::Request(request)) = payload else {
            panic!("expected single request");
        };
        assert_eq!(request.id, RequestId::Number(1));
        assert_eq!(request.method, "ping");
        assert!(request.params.is_none());
    }

    #[test]
    fn test_parse_notification_with_null_id() {
        let payload = Payload::parse(
            br#"{"jsonrpc":"2.0","id":null,"method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(matches!(payload, Payload::Single(Message::Notification(_))));
        assert!(!payload.has_requests());
    }

    #[test]
    fn test_parse_batch_request_ids_in_order() {
        let payload = Payload::parse(
            br#"[
                {"jsonrpc":"2.0","id":"a","method":"ping"},
                {"jsonrpc":"2.0","method":"notifications/initialized"},
                {"jsonrpc":"2.0","id":7,"method":"tools/list"}
            ]"#,
        )
        .unwrap();
        assert!(payload.is_batch());
        assert_eq!(
            payload.request_ids(),
            vec![RequestId::from("a"), RequestId::from(7)]
        );
    }

    #[test]
    fn test_parse_client_response() {
        let payload = Payload::parse(br#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert!(matches!(payload, Payload::Single(Message::Response(_))));
        assert!(!payload.has_requests());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Payload::parse(b"{not json").unwrap_err().code, PARSE_ERROR);
        assert_eq!(Payload::parse(b"[]").unwrap_err().code, INVALID_REQUEST);
        assert_eq!(Payload::parse(b"42").unwrap_err().code, INVALID_REQUEST);
        assert_eq!(
            Payload::parse(br#"{"id":1,"method":"ping"}"#).unwrap_err().code,
            INVALID_REQUEST
        );
        assert_eq!(
            Payload::parse(br#"{"jsonrpc":"2.0","id":1,"method":5}"#)
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
    }

    #[test]
    fn test_is_initialize() {
        let payload = Payload::parse(
            br#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#,
        )
        .unwrap();
        assert!(payload.is_initialize());
    }

    #[test]
    fn test_response_serialization() {
        let ok = Response::success(RequestId::from(1), json!({"x": 1}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": {"x": 1}})
        );

        let err = Response::error(None, RpcError::parse_error("Parse error"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
        assert!(value.get("result").is_none());
    }
}
