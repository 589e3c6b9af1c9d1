//! DB MCP Server
//!
//! Serves the database tools over SSE (default) or stdio. In stdio mode stdout
//! carries protocol frames only; all logging goes to stderr.

use clap::Parser;
use dbmcp_server::demo::register_demo_tools;
use dbmcp_server::{Cli, McpServer, TransportMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = cli.to_config();
    let builder = McpServer::builder().config(config);
    let server = register_demo_tools(builder, cli.databases.clone()).build()?;

    server.run_until(shutdown_signal()).await?;
    Ok(())
}

fn init_logging(cli: &Cli) {
    if cli.disable_logging {
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(cli.transport != TransportMode::Stdio)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl-C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}
