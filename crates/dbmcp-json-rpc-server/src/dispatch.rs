//! Message codec: tolerant decoding of inbound envelopes and stateless encoding of
//! outbound ones.

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{JsonRpcError, JsonRpcErrorObject},
    notification::JsonRpcNotification,
    request::{JsonRpcRequest, RequestParams},
    response::{JsonRpcMessage, JsonRpcResponse},
    types::{JsonRpcVersion, RequestId},
};

/// Last-resort frame used when an outbound message cannot be serialized.
const SERIALIZATION_FAILURE_FRAME: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// A decoded inbound message
#[derive(Debug, Clone)]
pub enum JsonRpcIncoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl JsonRpcIncoming {
    pub fn method(&self) -> &str {
        match self {
            JsonRpcIncoming::Request(req) => &req.method,
            JsonRpcIncoming::Notification(notif) => &notif.method,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcIncoming::Request(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcIncoming::Notification(_))
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcIncoming::Request(req) => Some(&req.id),
            JsonRpcIncoming::Notification(_) => None,
        }
    }
}

/// Outcome of processing one inbound message
#[derive(Debug, Clone)]
pub enum JsonRpcMessageResult {
    /// A response to a request
    Response(JsonRpcResponse),
    /// An error response
    Error(JsonRpcError),
    /// No response needed (for notifications)
    NoResponse,
}

impl JsonRpcMessageResult {
    /// Encoded frame, if there is anything to send
    pub fn to_json_string(&self) -> Option<String> {
        match self {
            JsonRpcMessageResult::Response(response) => Some(encode(response)),
            JsonRpcMessageResult::Error(error) => Some(encode(error)),
            JsonRpcMessageResult::NoResponse => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JsonRpcMessageResult::Error(_))
    }

    pub fn needs_response(&self) -> bool {
        !matches!(self, JsonRpcMessageResult::NoResponse)
    }
}

impl From<JsonRpcMessage> for JsonRpcMessageResult {
    fn from(message: JsonRpcMessage) -> Self {
        match message {
            JsonRpcMessage::Response(response) => JsonRpcMessageResult::Response(response),
            JsonRpcMessage::Error(error) => JsonRpcMessageResult::Error(error),
        }
    }
}

impl From<JsonRpcError> for JsonRpcMessageResult {
    fn from(error: JsonRpcError) -> Self {
        JsonRpcMessageResult::Error(error)
    }
}

/// Decode raw bytes. Invalid UTF-8 is reported as a parse error.
pub fn parse_json_rpc_bytes(bytes: &[u8]) -> Result<JsonRpcIncoming, JsonRpcError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| JsonRpcError::parse_error(Some(format!("Invalid UTF-8: {}", e))))?;
    parse_json_rpc_message(text)
}

/// Decode one JSON-RPC envelope.
///
/// A member `id` holding a string or integer makes the message a request; an
/// absent or `null` id makes it a notification. Unknown members are ignored.
/// `params` may be an object, an array, `null` or absent. On failure the returned
/// error carries the request id whenever it could be recovered from the input.
pub fn parse_json_rpc_message(json_str: &str) -> Result<JsonRpcIncoming, JsonRpcError> {
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| JsonRpcError::parse_error(Some(format!("Invalid JSON: {}", e))))?;

    let Value::Object(mut obj) = value else {
        return Err(JsonRpcError::invalid_request(
            None,
            Some("Message must be a JSON object".to_string()),
        ));
    };

    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match RequestId::from_value(&raw) {
            Some(id) => Some(id),
            None => {
                return Err(JsonRpcError::invalid_request(
                    None,
                    Some(format!("Invalid request id: {}", raw)),
                ));
            }
        },
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JsonRpcVersion::V2_0.as_str() => {}
        other => {
            return Err(JsonRpcError::invalid_request(
                id,
                Some(format!("Unsupported jsonrpc version: {}", describe(other))),
            ));
        }
    }

    let method = match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        other => {
            return Err(JsonRpcError::invalid_request(
                id,
                Some(format!("Missing or invalid method: {}", describe(other.as_ref()))),
            ));
        }
    };

    let params = match obj.remove("params") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(RequestParams::Object(map)),
        Some(Value::Array(arr)) => Some(RequestParams::Array(arr)),
        Some(other) => {
            return Err(JsonRpcError::invalid_request(
                id,
                Some(format!("params must be an object or array, got {}", other)),
            ));
        }
    };

    debug!(method = %method, id = ?id, "Decoded JSON-RPC message");

    Ok(match id {
        Some(id) => JsonRpcIncoming::Request(JsonRpcRequest::new(id, method, params)),
        None => JsonRpcIncoming::Notification(JsonRpcNotification::new(method, params)),
    })
}

fn describe(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<missing>".to_string(),
    }
}

fn encode<T: serde::Serialize>(message: &T) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize JSON-RPC message: {}", e);
        SERIALIZATION_FAILURE_FRAME.to_string()
    })
}

/// Encode a success response
pub fn encode_result(id: RequestId, result: Value) -> String {
    encode(&JsonRpcResponse::success(id, result))
}

/// Encode an error response; `id` is `None` when it could not be recovered
pub fn encode_error(id: Option<RequestId>, error: JsonRpcErrorObject) -> String {
    encode(&JsonRpcError::new(id, error))
}

/// Encode a notification. Non-structured params are encoded as `{}`.
pub fn encode_notification(method: &str, params: Value) -> String {
    let params = match params {
        Value::Object(_) | Value::Array(_) => params,
        _ => Value::Object(Map::new()),
    };
    encode(&JsonRpcNotification::with_value_params(method, params))
}
