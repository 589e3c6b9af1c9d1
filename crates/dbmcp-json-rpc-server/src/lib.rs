//! # JSON-RPC 2.0 Codec and Dispatcher
//!
//! Transport-agnostic JSON-RPC 2.0 building blocks used by both the SSE and the
//! stdio transports:
//!
//! - envelope types for requests, notifications, responses and errors
//! - a tolerant decoder ([`dispatch::parse_json_rpc_message`]) that tells requests
//!   and notifications apart and recovers the request id for error replies
//! - stateless encoders that always produce one complete, self-contained message
//! - a method dispatcher ([`JsonRpcDispatcher`]) that routes by method name
//!
//! Nothing in this crate knows about sockets, HTTP or standard streams.

pub mod dispatch;
pub mod error;
pub mod notification;
pub mod prelude;
pub mod request;
pub mod response;
pub mod types;

#[cfg(feature = "async")]
pub mod r#async;

// Re-export main types
pub use dispatch::{JsonRpcIncoming, JsonRpcMessageResult, parse_json_rpc_message};
pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject, JsonRpcTransportError};
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcMessage, JsonRpcResponse, ResponseResult};
pub use types::{JsonRpcVersion, RequestId};

#[cfg(feature = "async")]
pub use r#async::{JsonRpcDispatcher, JsonRpcHandler, SessionContext, ToJsonRpcError};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// A tool call that could not be carried out at the protocol level
    pub const TOOL_EXECUTION_FAILED: i64 = -32010;
}
