//! # Model Context Protocol wire types
//!
//! The subset of MCP that dbmcp speaks: the initialize handshake, tool
//! discovery and invocation, and the notifications that go with them.

pub mod initialize;
pub mod notifications;
pub mod schema;
pub mod tools;

pub use initialize::{
    Implementation, InitializeParams, InitializeResult, LoggingCapabilities, ServerCapabilities,
    ToolsCapabilities,
};
pub use notifications::{CancelParams, CancelledNotificationParams, ProgressNotificationParams};
pub use schema::JsonSchema;
pub use tools::{
    CallToolParams, CallToolResult, ContentBlock, ListToolsResult, Tool, ToolSchema,
};

use dbmcp_json_rpc_server::error::{JsonRpcErrorCode, JsonRpcErrorObject};
use dbmcp_json_rpc_server::{ToJsonRpcError, error_codes};

/// Protocol version answered when the client asks for one we do not know
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol versions the server is willing to echo back
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Pick the version to answer with during `initialize`
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v).copied())
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
}

/// Common result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// MCP-specific errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter type for '{param}': expected {expected}, got {actual}")]
    InvalidParameterType {
        param: String,
        expected: String,
        actual: String,
    },

    #[error("Tool execution failed: {0}")]
    ToolExecutionError(String),

    #[error("Tool '{tool}' timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl McpError {
    pub fn missing_param(param: &str) -> Self {
        Self::MissingParameter(param.to_string())
    }

    pub fn invalid_param_type(param: &str, expected: &str, actual: &str) -> Self {
        Self::InvalidParameterType {
            param: param.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::ToolExecutionError(message.into())
    }

    /// Whether this error describes a tool-level failure that is reported as
    /// `isError` content rather than as a protocol error.
    pub fn is_tool_fault(&self) -> bool {
        matches!(
            self,
            McpError::MissingParameter(_)
                | McpError::InvalidParameterType { .. }
                | McpError::ToolExecutionError(_)
                | McpError::ToolTimeout { .. }
                | McpError::Cancelled(_)
        )
    }

    /// Convert to a JSON-RPC error object
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            McpError::ToolNotFound(_) => JsonRpcErrorObject {
                code: error_codes::METHOD_NOT_FOUND,
                message: self.to_string(),
                data: None,
            },
            McpError::InvalidParameters(msg) => JsonRpcErrorObject::invalid_params(msg),
            McpError::MissingParameter(_) | McpError::InvalidParameterType { .. } => {
                JsonRpcErrorObject::invalid_params(&self.to_string())
            }
            McpError::ToolExecutionError(_)
            | McpError::ToolTimeout { .. }
            | McpError::Cancelled(_) => JsonRpcErrorObject::server_error(
                error_codes::TOOL_EXECUTION_FAILED,
                &self.to_string(),
                None,
            ),
            McpError::AlreadyInitialized => JsonRpcErrorObject::new(
                JsonRpcErrorCode::InvalidRequest,
                Some(self.to_string()),
                None,
            ),
            McpError::SessionError(_) => {
                JsonRpcErrorObject::server_error(-32031, &self.to_string(), None)
            }
            McpError::SerializationError(_) => {
                JsonRpcErrorObject::internal_error(Some(self.to_string()))
            }
        }
    }
}

impl ToJsonRpcError for McpError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        McpError::to_error_object(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2025-06-18")), "2025-06-18");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), "2024-11-05");
        assert_eq!(negotiate_protocol_version(None), "2024-11-05");
    }

    #[test]
    fn test_error_code_mapping() {
        let not_found = McpError::ToolNotFound("ghost".into()).to_error_object();
        assert_eq!(not_found.code, -32601);
        assert_eq!(not_found.message, "Tool not found: ghost");

        assert_eq!(McpError::missing_param("sql").to_error_object().code, -32602);
        assert_eq!(
            McpError::InvalidParameters("x".into()).to_error_object().code,
            -32602
        );
        assert_eq!(McpError::AlreadyInitialized.to_error_object().code, -32600);
        assert_eq!(
            McpError::tool_execution("boom").to_error_object().code,
            -32010
        );
    }

    #[test]
    fn test_tool_fault_classification() {
        assert!(McpError::tool_execution("boom").is_tool_fault());
        assert!(McpError::missing_param("a").is_tool_fault());
        assert!(!McpError::ToolNotFound("a".into()).is_tool_fault());
        assert!(!McpError::AlreadyInitialized.is_tool_fault());
    }
}
