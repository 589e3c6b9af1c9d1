//! # DB MCP Server
//!
//! Exposes database tools to MCP clients over either the HTTP+SSE transport
//! or newline-delimited JSON on stdin/stdout. Both transports share one
//! method table, one session manager and one tool registry.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbmcp_server::{McpServer, ToolOutput, tool_fn};
//! use dbmcp_protocol::{JsonSchema, Tool, ToolSchema};
//!
//! #[tokio::main]
//! async fn main() -> dbmcp_server::Result<()> {
//!     let echo = Tool::new(
//!         "echo",
//!         ToolSchema::object().with_required_property("message", JsonSchema::string()),
//!     );
//!
//!     let server = McpServer::builder()
//!         .name("echo-server")
//!         .tool(echo, tool_fn(|_ctx, args| async move {
//!             let message = args.get("message").cloned().unwrap_or_default();
//!             Ok(ToolOutput::Structured(message))
//!         }))
//!         .build()?;
//!
//!     server.run().await
//! }
//! ```

pub mod builder;
pub mod cancellation;
pub mod config;
pub mod demo;
pub mod handlers;
pub mod notifications;
pub mod registry;
pub mod server;
pub mod stdio;
pub mod tool;

#[cfg(test)]
mod tests;

pub use builder::McpServerBuilder;
pub use cancellation::{CancellationHandle, InFlightCalls};
pub use config::{Cli, ServerConfig, TransportMode};
pub use handlers::{McpHandler, McpHandlerBridge, RequestContext};
pub use notifications::NotificationBus;
pub use registry::{RegisteredTool, RegistryEvent, ToolRegistry, validate_arguments};
pub use server::McpServer;
pub use stdio::StdioTransport;
pub use tool::{ProgressReporter, ToolContext, ToolHandler, ToolOutput, tool_fn};

// Explicitly re-export error types for convenience
pub use dbmcp_protocol::{McpError, McpResult};

/// Result type for framework operations
pub type Result<T> = std::result::Result<T, McpFrameworkError>;

/// Framework-level errors
#[derive(Debug, thiserror::Error)]
pub enum McpFrameworkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] dbmcp_http_server::HttpMcpError),

    #[error("Session error: {0}")]
    Session(#[from] dbmcp_session::SessionError),

    #[error("Tool error: {0}")]
    Tool(String),
}
