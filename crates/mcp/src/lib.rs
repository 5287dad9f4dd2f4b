// MCP (Model Context Protocol) core: tool registry, JSON-RPC dispatch,
// stdio line framing and SSE wire framing

pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod sse;
pub mod tools;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use error::{McpError, McpResult};
pub use tools::{Tool, ToolRegistry};
