//! # toolrpc SDK
//!
//! Rust client for toolrpc servers speaking JSON-RPC 2.0 over Server-Sent Events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use toolrpc_sdk::{McpClient, SdkResult};
//!
//! #[tokio::main]
//! async fn main() -> SdkResult<()> {
//!     let client = McpClient::builder()
//!         .url("http://localhost:8080/sse")
//!         .build()?;
//!
//!     // Open the event stream and perform the handshake
//!     client.connect().await?;
//!     let info = client.start().await?;
//!     println!("Connected to {}", info.server_info.name);
//!
//!     for tool in client.list_tools().await? {
//!         println!("{}: {}", tool.name, tool.description);
//!     }
//!
//!     let result = client.call_tool("add", json!({"a": 15, "b": 25})).await?;
//!     println!("add = {}", result.joined_text());
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Raw event streams
//!
//! [`EventSource`] can be used on its own to follow any event stream with
//! automatic reconnection and `Last-Event-ID` resumption:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use toolrpc_sdk::EventSource;
//!
//! # async fn example() -> toolrpc_sdk::SdkResult<()> {
//! let url = url::Url::parse("http://localhost:8080/sse")?;
//! let source = EventSource::new(url, reqwest::Client::new(), Duration::from_secs(3), None);
//! source.on("heartbeat", Arc::new(|data, _| println!("heartbeat: {:?}", data)));
//! source.start()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod pending;
pub mod transport;

pub use client::{McpClient, McpClientBuilder};
pub use config::ClientConfig;
pub use error::{SdkError, SdkResult};
pub use pending::PendingRequests;
pub use transport::{EventSource, HttpTransport, Listener};

// Re-export protocol types for convenience
pub use toolrpc_mcp::protocol::{
    CallToolResult, ClientInfo, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ToolContent, ToolSchema,
};
