// Stdio mode: serve JSON-RPC over the process's stdin/stdout

use crate::config::StdioConfig;
use anyhow::Result;
use std::sync::Arc;
use toolrpc_mcp::transport::StdioTransport;
use toolrpc_mcp::Dispatcher;

/// Run until stdin closes or Ctrl-C is received
pub async fn serve(dispatcher: Arc<Dispatcher>, config: &StdioConfig) -> Result<()> {
    let mut transport = StdioTransport::with_max_line_length(
        dispatcher,
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.max_line_length,
    );

    let handle = transport.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping stdio transport");
            handle.stop();
        }
    });

    transport.run().await?;
    Ok(())
}
