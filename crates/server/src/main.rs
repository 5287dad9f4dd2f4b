use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolrpc_mcp::Dispatcher;

mod api;
mod config;
mod stdio;
mod tools;

use config::{AppState, ServerConfig, TransportKind};

#[derive(Parser, Debug)]
#[command(name = "toolrpc")]
#[command(about = "Serve tools over JSON-RPC on stdio or Server-Sent Events", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "toolrpc.toml", env = "TOOLRPC_CONFIG")]
    config: PathBuf,

    /// Transport to serve on (overrides the configuration file)
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Port to listen on for the SSE transport
    #[arg(short, long, env = "TOOLRPC_PORT")]
    port: Option<u16>,

    /// Host to bind to for the SSE transport
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries protocol traffic in stdio mode
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolrpc=info,tower_http=debug".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config)?;
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(port) = args.port {
        config.sse.port = Some(port);
    }
    if let Some(host) = args.host {
        config.sse.host = host;
    }
    config.validate().context("Invalid configuration")?;

    let registry = tools::builtin_registry().context("Failed to register tools")?;
    tracing::info!(
        "{} v{} ({}) starting with tools: {}",
        config.name,
        config.version,
        config.transport,
        registry.names().collect::<Vec<_>>().join(", ")
    );

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), config.server_info()));

    match config.transport {
        TransportKind::Stdio => stdio::serve(dispatcher, &config.stdio).await,
        TransportKind::Sse => {
            let state = AppState::new(config, dispatcher);
            api::serve(state, shutdown_signal()).await
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
