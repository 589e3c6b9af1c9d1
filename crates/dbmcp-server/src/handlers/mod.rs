//! MCP Handler System
//!
//! Each MCP method is served by an [`McpHandler`]. Handlers see the resolved
//! [`Session`] rather than a bare id; [`McpHandlerBridge`] does that lookup and
//! adapts them to the JSON-RPC dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use dbmcp_json_rpc_server::{JsonRpcHandler, RequestId, RequestParams, SessionContext};
use dbmcp_protocol::{McpError, McpResult};
use dbmcp_session::{Session, SessionManager};
use serde_json::Value;
use tracing::debug;

pub mod cancel;
pub mod initialize;
pub mod lifecycle;
pub mod tools;

pub use cancel::{CancelRequestHandler, CancelledNotificationHandler};
pub use initialize::InitializeHandler;
pub use lifecycle::{ClientNotificationHandler, EditorContextHandler, PingHandler};
pub use tools::{ToolsCallHandler, ToolsListHandler};

/// Session and request a handler is serving
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: Arc<Session>,
    /// `None` when serving a notification
    pub request_id: Option<RequestId>,
    /// Transport name supplied by the transport ("sse" or "stdio")
    pub transport: Option<String>,
}

impl RequestContext {
    pub fn session_id(&self) -> &str {
        self.session.id()
    }
}

/// Generic MCP handler trait
#[async_trait]
pub trait McpHandler: Send + Sync {
    /// Handle an MCP request
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value>;

    /// Handle an MCP notification. Ignored unless overridden.
    async fn handle_notification(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<()> {
        let _ = (params, ctx);
        Ok(())
    }

    /// Methods this handler is registered under
    fn supported_methods(&self) -> Vec<String>;
}

/// Session-aware bridge adapting an [`McpHandler`] to [`JsonRpcHandler`]
pub struct McpHandlerBridge {
    handler: Arc<dyn McpHandler>,
    sessions: Arc<SessionManager>,
}

impl McpHandlerBridge {
    pub fn new(handler: Arc<dyn McpHandler>, sessions: Arc<SessionManager>) -> Self {
        Self { handler, sessions }
    }

    /// Resolve the session; the lookup counts as client activity
    async fn context(&self, session_context: &SessionContext) -> McpResult<RequestContext> {
        let session = self
            .sessions
            .get_session(&session_context.session_id)
            .await
            .map_err(|e| McpError::SessionError(e.to_string()))?;

        Ok(RequestContext {
            session,
            request_id: session_context.request_id.clone(),
            transport: session_context
                .metadata
                .get("transport")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[async_trait]
impl JsonRpcHandler for McpHandlerBridge {
    type Error = McpError;

    async fn handle(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session_context: SessionContext,
    ) -> McpResult<Value> {
        debug!(session = %session_context.session_id, "Handling {} request", method);
        let ctx = self.context(&session_context).await?;
        self.handler.handle(params.map(|p| p.to_value()), ctx).await
    }

    async fn handle_notification(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session_context: SessionContext,
    ) -> McpResult<()> {
        debug!(session = %session_context.session_id, "Handling {} notification", method);
        let ctx = self.context(&session_context).await?;
        self.handler
            .handle_notification(params.map(|p| p.to_value()), ctx)
            .await
    }

    fn supported_methods(&self) -> Vec<String> {
        self.handler.supported_methods()
    }
}
