//! Fluent construction of [`McpServer`]

use std::sync::Arc;
use std::time::Duration;

use dbmcp_protocol::Tool;
use dbmcp_session::SessionManager;

use crate::config::{ServerConfig, TransportMode};
use crate::registry::ToolRegistry;
use crate::server::McpServer;
use crate::tool::ToolHandler;
use crate::{McpFrameworkError, Result};

pub struct McpServerBuilder {
    config: ServerConfig,
    tools: Vec<(Tool, Arc<dyn ToolHandler>)>,
    sessions: Option<Arc<SessionManager>>,
    tool_errors: Vec<String>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            tools: Vec::new(),
            sessions: None,
            tool_errors: Vec::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    pub fn transport(mut self, transport: TransportMode) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn slow_client_timeout(mut self, timeout: Duration) -> Self {
        self.config.slow_client_timeout = timeout;
        self
    }

    /// Add a `clientInfo.name` substring that selects the slow-client deadline
    pub fn slow_client_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.slow_client_markers.push(marker.into());
        self
    }

    pub fn tools_list_changed(mut self, enabled: bool) -> Self {
        self.config.tools_list_changed = enabled;
        self
    }

    pub fn initialized_notification_delay(mut self, delay: Duration) -> Self {
        self.config.initialized_notification_delay = delay;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn session_max_age(mut self, max_age: Duration) -> Self {
        self.config.session_max_age = max_age;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn echo_response_body(mut self, enabled: bool) -> Self {
        self.config.echo_response_body = enabled;
        self
    }

    /// Register a tool
    pub fn tool<H>(self, tool: Tool, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        self.tool_arc(tool, Arc::new(handler))
    }

    pub fn tool_arc(mut self, tool: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        if tool.name.trim().is_empty() {
            self.tool_errors.push("Tool name cannot be empty".to_string());
        } else if self.tools.iter().any(|(existing, _)| existing.name == tool.name) {
            self.tool_errors
                .push(format!("Duplicate tool name: {}", tool.name));
        }
        self.tools.push((tool, handler));
        self
    }

    /// Share a session manager, e.g. with a test harness
    pub fn sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn build(self) -> Result<McpServer> {
        if !self.tool_errors.is_empty() {
            return Err(McpFrameworkError::Tool(self.tool_errors.join("; ")));
        }
        self.config.validate()?;

        let registry = Arc::new(ToolRegistry::new());
        for (tool, handler) in self.tools {
            registry.register_arc(tool, handler);
        }
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(SessionManager::new()));

        Ok(McpServer::new(self.config, sessions, registry))
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
