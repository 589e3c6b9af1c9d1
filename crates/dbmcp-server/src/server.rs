//! MCP server: method table wiring and transport selection

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use dbmcp_http_server::{HttpMcpServer, ServerConfig as HttpServerConfig};
use dbmcp_json_rpc_server::JsonRpcDispatcher;
use dbmcp_protocol::notifications::methods;
use dbmcp_protocol::{Implementation, McpError};
use dbmcp_session::SessionManager;
use tracing::{debug, info};

use crate::builder::McpServerBuilder;
use crate::cancellation::InFlightCalls;
use crate::config::{ServerConfig, TransportMode};
use crate::handlers::{
    CancelRequestHandler, CancelledNotificationHandler, ClientNotificationHandler,
    EditorContextHandler, InitializeHandler, McpHandler, McpHandlerBridge, PingHandler,
    ToolsCallHandler, ToolsListHandler,
};
use crate::notifications::NotificationBus;
use crate::registry::ToolRegistry;
use crate::stdio::{StdioTransport, detached_reader};
use crate::{McpFrameworkError, Result};

/// A configured server, ready to run on either transport
#[derive(Clone)]
pub struct McpServer {
    config: Arc<ServerConfig>,
    sessions: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
    calls: Arc<InFlightCalls>,
    bus: NotificationBus,
    dispatcher: Arc<JsonRpcDispatcher<McpError>>,
}

impl McpServer {
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    pub(crate) fn new(
        config: ServerConfig,
        sessions: Arc<SessionManager>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let config = Arc::new(config);
        let calls = Arc::new(InFlightCalls::new());
        let bus = NotificationBus::new(Arc::clone(&sessions));

        let initialize = InitializeHandler::new(
            Implementation::new(&config.server_name, &config.server_version),
            Arc::clone(&registry),
            bus.clone(),
        )
        .with_instructions(config.instructions.clone())
        .with_tools_list_changed(config.tools_list_changed)
        .with_notification_delay(config.initialized_notification_delay);

        let handlers: Vec<Arc<dyn McpHandler>> = vec![
            Arc::new(initialize),
            Arc::new(PingHandler),
            Arc::new(ToolsListHandler::new(Arc::clone(&registry))),
            Arc::new(ToolsCallHandler::new(
                Arc::clone(&registry),
                Arc::clone(&calls),
                bus.clone(),
                Arc::clone(&config),
            )),
            Arc::new(EditorContextHandler),
            Arc::new(CancelRequestHandler::new(Arc::clone(&calls))),
            Arc::new(CancelledNotificationHandler::new(Arc::clone(&calls))),
            Arc::new(ClientNotificationHandler::new(methods::INITIALIZED)),
            Arc::new(ClientNotificationHandler::new(methods::TOOLS_LIST_CHANGED)),
        ];

        let mut dispatcher = JsonRpcDispatcher::new();
        for handler in handlers {
            let methods = handler.supported_methods();
            let bridge = McpHandlerBridge::new(handler, Arc::clone(&sessions));
            dispatcher.register_methods(methods, bridge);
        }
        debug!("Registered methods: {:?}", dispatcher.registered_methods());

        Self {
            config,
            sessions,
            registry,
            calls,
            bus,
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Tools can be added or removed while serving
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn notification_bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<JsonRpcDispatcher<McpError>> {
        &self.dispatcher
    }

    pub fn in_flight_calls(&self) -> &Arc<InFlightCalls> {
        &self.calls
    }

    /// Stdio transport sharing this server's method table and sessions
    pub fn stdio_transport(&self) -> StdioTransport {
        StdioTransport::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.sessions),
            Arc::clone(&self.calls),
        )
    }

    /// Settings for the HTTP+SSE transport bound to `bind_address`
    pub fn http_config(&self, bind_address: SocketAddr) -> HttpServerConfig {
        HttpServerConfig {
            bind_address,
            sse_path: self.config.sse_path.clone(),
            message_path: self.config.message_path.clone(),
            base_url: self.config.base_url.clone(),
            enable_cors: self.config.enable_cors,
            max_body_size: self.config.max_body_size,
            heartbeat_interval: self.config.heartbeat_interval,
            echo_response_body: self.config.echo_response_body,
            session_max_age: self.config.session_max_age,
            cleanup_interval: self.config.cleanup_interval,
        }
    }

    /// Serve until the process is stopped
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve on the configured transport until `shutdown` resolves
    /// (or, for stdio, until end of input)
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting {} v{} with {} tool(s) on {} transport",
            self.config.server_name,
            self.config.server_version,
            self.registry.len(),
            self.config.transport
        );

        let forwarder = self
            .config
            .tools_list_changed
            .then(|| self.bus.spawn_registry_forwarder(&self.registry));

        let outcome = match self.config.transport {
            TransportMode::Sse => self.run_sse(shutdown).await,
            TransportMode::Stdio => {
                let stdin = detached_reader(std::io::stdin())?;
                self.stdio_transport()
                    .serve_until(stdin, tokio::io::stdout(), shutdown)
                    .await
            }
        };

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        info!("Server stopped");
        outcome
    }

    async fn run_sse<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let bind_address = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await?
            .next()
            .ok_or_else(|| {
                McpFrameworkError::Config(format!(
                    "Cannot resolve bind address {}:{}",
                    self.config.host, self.config.port
                ))
            })?;

        let http_server = HttpMcpServer::builder()
            .config(self.http_config(bind_address))
            .dispatcher(Arc::clone(&self.dispatcher))
            .sessions(Arc::clone(&self.sessions))
            .build()?;
        http_server.run_until(shutdown).await?;
        Ok(())
    }
}
