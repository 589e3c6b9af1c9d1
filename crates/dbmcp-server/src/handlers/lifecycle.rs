//! `ping`, `editor/context` and the client-sent notifications

use async_trait::async_trait;
use dbmcp_protocol::McpResult;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{McpHandler, RequestContext};

/// Session data key holding the last `editor/context` payload
pub const EDITOR_CONTEXT_KEY: &str = "editorContext";

/// Ping handler for ping endpoint
pub struct PingHandler;

#[async_trait]
impl McpHandler for PingHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
        Ok(json!({}))
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["ping".to_string()]
    }
}

/// Stores the editor's context (open file, selection, ...) on the session
pub struct EditorContextHandler;

impl EditorContextHandler {
    fn store(params: Option<Value>, ctx: &RequestContext) {
        match params {
            Some(Value::Object(context)) => {
                debug!(session = %ctx.session_id(), keys = context.len(), "Editor context updated");
                ctx.session.set_data(EDITOR_CONTEXT_KEY, Value::Object(context));
            }
            other => {
                warn!(
                    session = %ctx.session_id(),
                    "Ignoring editor/context without an object payload: {:?}",
                    other
                );
            }
        }
    }
}

#[async_trait]
impl McpHandler for EditorContextHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        Self::store(params, &ctx);
        Ok(json!({}))
    }

    async fn handle_notification(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<()> {
        Self::store(params, &ctx);
        Ok(())
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["editor/context".to_string()]
    }
}

/// Accepts a client notification such as `notifications/initialized`.
///
/// Produces no output; answers `{}` if a client sends it with an id.
pub struct ClientNotificationHandler {
    method: &'static str,
}

impl ClientNotificationHandler {
    pub fn new(method: &'static str) -> Self {
        Self { method }
    }
}

#[async_trait]
impl McpHandler for ClientNotificationHandler {
    async fn handle(&self, _params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        debug!(session = %ctx.session_id(), "{} sent as a request", self.method);
        Ok(json!({}))
    }

    async fn handle_notification(
        &self,
        _params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<()> {
        info!(session = %ctx.session_id(), "Received {}", self.method);
        Ok(())
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![self.method.to_string()]
    }
}
