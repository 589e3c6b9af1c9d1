//! Server configuration and the command-line surface of the binary.
//!
//! Configuration is read once at startup; nothing re-reads it while serving.

use std::fmt;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::{McpFrameworkError, Result};

pub const DEFAULT_SERVER_NAME: &str = "DB MCP Server";
pub const DEFAULT_PORT: u16 = 9092;

/// How the server talks to its client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// HTTP event stream plus message endpoint
    #[default]
    Sse,
    /// Newline-delimited JSON on stdin/stdout
    Stdio,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Sse => write!(f, "sse"),
            TransportMode::Stdio => write!(f, "stdio"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: TransportMode,
    pub host: String,
    pub port: u16,
    /// Public base URL for the endpoint event; relative when unset
    pub base_url: Option<String>,

    pub server_name: String,
    pub server_version: String,
    pub instructions: Option<String>,
    /// Advertise and send `notifications/tools/list_changed`
    pub tools_list_changed: bool,
    /// Wait after `initialize` before announcing the tool list
    pub initialized_notification_delay: Duration,

    pub tool_timeout: Duration,
    pub slow_client_timeout: Duration,
    /// Case-insensitive substrings of `clientInfo.name` marking a slow client
    pub slow_client_markers: Vec<String>,
    /// Treat every client as slow
    pub assume_slow_client: bool,

    pub session_max_age: Duration,
    pub cleanup_interval: Duration,
    pub heartbeat_interval: Duration,
    pub sse_path: String,
    pub message_path: String,
    pub max_body_size: usize,
    pub enable_cors: bool,
    /// Duplicate each response in the POST body as well as on the stream
    pub echo_response_body: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Sse,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            base_url: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            tools_list_changed: true,
            initialized_notification_delay: Duration::from_millis(100),
            tool_timeout: Duration::from_secs(30),
            slow_client_timeout: Duration::from_secs(120),
            slow_client_markers: vec!["cursor".to_string()],
            assume_slow_client: false,
            session_max_age: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            enable_cors: true,
            echo_response_body: true,
        }
    }
}

impl ServerConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.server_name.trim().is_empty() {
            errors.push("Server name cannot be empty".to_string());
        }
        if self.server_version.trim().is_empty() {
            errors.push("Server version cannot be empty".to_string());
        }
        if self.tool_timeout.is_zero() || self.slow_client_timeout.is_zero() {
            errors.push("Tool timeouts must be greater than zero".to_string());
        }
        if self.heartbeat_interval.is_zero() || self.cleanup_interval.is_zero() {
            errors.push("Heartbeat and cleanup intervals must be greater than zero".to_string());
        }
        for (label, path) in [("SSE", &self.sse_path), ("message", &self.message_path)] {
            if !path.starts_with('/') {
                errors.push(format!("{} path must start with '/': {}", label, path));
            }
        }
        if self.sse_path == self.message_path {
            errors.push("SSE and message paths must differ".to_string());
        }
        if self.max_body_size == 0 {
            errors.push("Maximum body size must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpFrameworkError::Config(errors.join("; ")))
        }
    }

    /// Deadline for tool calls of a client named `client_name`
    pub fn tool_deadline(&self, client_name: Option<&str>) -> Duration {
        if self.is_slow_client(client_name) {
            self.slow_client_timeout
        } else {
            self.tool_timeout
        }
    }

    pub fn is_slow_client(&self, client_name: Option<&str>) -> bool {
        if self.assume_slow_client {
            return true;
        }
        let Some(name) = client_name else {
            return false;
        };
        let name = name.to_lowercase();
        self.slow_client_markers
            .iter()
            .any(|marker| !marker.is_empty() && name.contains(&marker.to_lowercase()))
    }
}

/// Command line of the `dbmcp-server` binary. Every flag has an environment fallback.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbmcp-server",
    version,
    about = "MCP server exposing database tools over SSE or stdio"
)]
pub struct Cli {
    /// Transport to serve
    #[arg(
        short = 't',
        long,
        env = "TRANSPORT_MODE",
        value_enum,
        default_value_t = TransportMode::Sse
    )]
    pub transport: TransportMode,

    /// Host to bind in SSE mode
    #[arg(long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind in SSE mode
    #[arg(short = 'p', long, env = "SERVER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Install no log subscriber at all
    #[arg(long, env = "DISABLE_LOGGING")]
    pub disable_logging: bool,

    /// Public base URL announced in the endpoint event
    #[arg(long, env = "MCP_BASE_URL")]
    pub base_url: Option<String>,

    /// Tool call deadline in seconds
    #[arg(long, env = "MCP_TOOL_TIMEOUT_SECS", default_value_t = 30)]
    pub tool_timeout_secs: u64,

    /// Tool call deadline in seconds for slow clients
    #[arg(long, env = "MCP_SLOW_CLIENT_TIMEOUT_SECS", default_value_t = 120)]
    pub slow_client_timeout_secs: u64,

    /// Database ids reported by `list_databases`
    #[arg(long = "database", env = "MCP_DATABASES", value_delimiter = ',')]
    pub databases: Vec<String>,

    /// Set by the editor integration; any value enables the slow-client deadline
    #[arg(long, env = "CURSOR_EDITOR", hide = true)]
    pub cursor_editor: Option<String>,
}

impl Cli {
    pub fn to_config(&self) -> ServerConfig {
        ServerConfig {
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            base_url: self.base_url.clone().filter(|url| !url.is_empty()),
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            slow_client_timeout: Duration::from_secs(self.slow_client_timeout_secs),
            assume_slow_client: self.cursor_editor.is_some(),
            ..ServerConfig::default()
        }
    }
}
