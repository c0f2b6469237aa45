//! JSON-RPC 2.0 wire model.
//!
//! Requests, notifications and responses travel as single objects or as
//! batches. Parsing is strict about the envelope and lenient about params,
//! which are validated by the route that owns the method.

mod error;
mod message;

pub use error::{
    RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use message::{
    Message, Notification, Payload, Request, RequestId, Response, INITIALIZE_METHOD,
    JSONRPC_VERSION,
};
