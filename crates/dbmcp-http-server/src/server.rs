//! HTTP+SSE server: listener, connection loop and configuration

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use dbmcp_json_rpc_server::JsonRpcDispatcher;
use dbmcp_protocol::McpError;
use dbmcp_session::SessionManager;

use crate::{HttpMcpError, Result, SseSessionHandler};

/// Configuration for the HTTP+SSE transport
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path of the event stream endpoint
    pub sse_path: String,
    /// Path of the message endpoint
    pub message_path: String,
    /// Public base URL prefixed to the endpoint event, relative when unset
    pub base_url: Option<String>,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Keepalive period on open streams
    pub heartbeat_interval: Duration,
    /// Also return the response frame in the POST body
    pub echo_response_body: bool,
    /// Idle time after which a disconnected session is reaped
    pub session_max_age: Duration,
    /// Period of the reaper
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9092)),
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            base_url: None,
            enable_cors: true,
            max_body_size: 1024 * 1024, // 1MB
            heartbeat_interval: Duration::from_secs(30),
            echo_response_body: true,
            session_max_age: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Builder for [`HttpMcpServer`]
pub struct HttpMcpServerBuilder {
    config: ServerConfig,
    dispatcher: Option<Arc<JsonRpcDispatcher<McpError>>>,
    sessions: Option<Arc<SessionManager>>,
}

impl HttpMcpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: None,
            sessions: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn sse_path(mut self, path: impl Into<String>) -> Self {
        self.config.sse_path = path.into();
        self
    }

    pub fn message_path(mut self, path: impl Into<String>) -> Self {
        self.config.message_path = path.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Method table shared with every request
    pub fn dispatcher(mut self, dispatcher: Arc<JsonRpcDispatcher<McpError>>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Session collection shared with the rest of the server
    pub fn sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn build(self) -> Result<HttpMcpServer> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| HttpMcpError::InvalidRequest("dispatcher must be provided".into()))?;
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(SessionManager::new()));
        let config = Arc::new(self.config);

        Ok(HttpMcpServer {
            handler: SseSessionHandler::new(Arc::clone(&config), dispatcher, Arc::clone(&sessions)),
            config,
            sessions,
        })
    }
}

impl Default for HttpMcpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP+SSE server
#[derive(Clone)]
pub struct HttpMcpServer {
    config: Arc<ServerConfig>,
    sessions: Arc<SessionManager>,
    handler: SseSessionHandler,
}

impl HttpMcpServer {
    pub fn builder() -> HttpMcpServerBuilder {
        HttpMcpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handler(&self) -> &SseSessionHandler {
        &self.handler
    }

    /// Serve until the process is stopped
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Open streams are dropped with the runtime.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!("HTTP MCP server listening on {}", listener.local_addr()?);
        info!(
            "SSE endpoint: {}, message endpoint: {}",
            self.config.sse_path, self.config.message_path
        );

        let cleanup = Arc::clone(&self.sessions)
            .start_cleanup_task(self.config.cleanup_interval, self.config.session_max_age);

        tokio::pin!(shutdown);
        let outcome = loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => break Err(HttpMcpError::Io(err)),
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
            };
            debug!("New connection from {}", peer_addr);

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle_request(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    if err.is_incomplete_message() || err.is_canceled() {
                        debug!("Client disconnected: {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        };

        cleanup.abort();
        outcome
    }
}
