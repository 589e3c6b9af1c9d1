//! # HTTP+SSE Transport
//!
//! Long-lived `GET` event stream paired with a short-lived `POST` endpoint keyed
//! by session id. Responses travel back over the session's event stream so they
//! stay ordered with server-pushed notifications; the `POST` body may carry a
//! duplicate of the same frame for clients that expect synchronous HTTP.
//!
//! ## Endpoints
//! - `GET /sse` opens the stream; the first event names the message endpoint
//! - `POST /message?sessionId=<id>` accepts one JSON-RPC message
//! - `GET /status` reports the number of live sessions
//! - `OPTIONS *` answers CORS preflight

pub mod cors;
pub mod server;
pub mod session_handler;
pub mod sse;

#[cfg(test)]
mod tests;

pub use cors::CorsLayer;
pub use server::{HttpMcpServer, HttpMcpServerBuilder, ServerConfig};
pub use session_handler::{McpBody, SessionSseStream, SseSessionHandler};
pub use sse::SseEvent;

/// Result type for HTTP MCP operations
pub type Result<T> = std::result::Result<T, HttpMcpError>;

/// HTTP MCP specific errors
#[derive(Debug, thiserror::Error)]
pub enum HttpMcpError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] dbmcp_json_rpc_server::JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
