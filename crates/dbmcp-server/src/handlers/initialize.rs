//! `initialize`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbmcp_protocol::notifications::methods;
use dbmcp_protocol::{
    Implementation, InitializeParams, InitializeResult, McpError, McpResult, ServerCapabilities,
    negotiate_protocol_version,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{McpHandler, RequestContext};
use crate::notifications::NotificationBus;
use crate::registry::ToolRegistry;

/// Session data key holding the client's `clientInfo`
pub const CLIENT_INFO_KEY: &str = "clientInfo";

/// Handshake handler. Accepted once per session.
pub struct InitializeHandler {
    server_info: Implementation,
    instructions: Option<String>,
    tools_list_changed: bool,
    notification_delay: Duration,
    registry: Arc<ToolRegistry>,
    bus: NotificationBus,
}

impl InitializeHandler {
    pub fn new(
        server_info: Implementation,
        registry: Arc<ToolRegistry>,
        bus: NotificationBus,
    ) -> Self {
        Self {
            server_info,
            instructions: None,
            tools_list_changed: true,
            notification_delay: Duration::from_millis(100),
            registry,
            bus,
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_tools_list_changed(mut self, enabled: bool) -> Self {
        self.tools_list_changed = enabled;
        self
    }

    pub fn with_notification_delay(mut self, delay: Duration) -> Self {
        self.notification_delay = delay;
        self
    }

    /// Announce the tool list once the client has had time to process the response
    fn schedule_tools_announcement(&self, ctx: &RequestContext) {
        if !self.tools_list_changed || self.registry.is_empty() {
            return;
        }
        let session = Arc::clone(&ctx.session);
        let bus = self.bus.clone();
        let delay = self.notification_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if bus.notify(&session, methods::TOOLS_LIST_CHANGED, json!({})).await {
                debug!(session = %session.id(), "Announced tool list after initialize");
            }
        });
    }
}

#[async_trait]
impl McpHandler for InitializeHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        let params: InitializeParams = match params {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                McpError::InvalidParameters(format!("Invalid initialize params: {}", e))
            })?,
            None => InitializeParams::default(),
        };

        if !ctx.session.mark_initialized() {
            warn!(session = %ctx.session_id(), "Rejecting repeated initialize");
            return Err(McpError::AlreadyInitialized);
        }

        let protocol_version = negotiate_protocol_version(params.protocol_version.as_deref());
        ctx.session.merge_capabilities(params.capabilities);
        if let Some(client_info) = &params.client_info {
            ctx.session
                .set_data(CLIENT_INFO_KEY, serde_json::to_value(client_info)?);
        }
        info!(
            session = %ctx.session_id(),
            client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
            protocol_version = %protocol_version,
            "Session initialized"
        );

        let mut result = InitializeResult::new(
            protocol_version,
            self.server_info.clone(),
            ServerCapabilities::with_tools_list_changed(self.tools_list_changed),
        );
        if let Some(instructions) = &self.instructions {
            result = result.with_instructions(instructions.clone());
        }

        self.schedule_tools_announcement(&ctx);
        Ok(serde_json::to_value(result)?)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["initialize".to_string()]
    }
}
