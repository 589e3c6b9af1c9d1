//! # JSON-RPC Server Prelude
//!
//! ```rust
//! use dbmcp_json_rpc_server::prelude::*;
//! ```

pub use crate::dispatch::{
    JsonRpcIncoming, JsonRpcMessageResult, encode_error, encode_notification, encode_result,
    parse_json_rpc_bytes, parse_json_rpc_message,
};
pub use crate::error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use crate::notification::JsonRpcNotification;
pub use crate::request::{JsonRpcRequest, RequestParams};
pub use crate::response::{JsonRpcMessage, JsonRpcResponse, ResponseResult};
pub use crate::types::{JsonRpcVersion, RequestId};

#[cfg(feature = "async")]
pub use crate::r#async::{JsonRpcDispatcher, JsonRpcHandler, SessionContext, ToJsonRpcError};

// Standard error codes
pub use crate::error_codes::*;
