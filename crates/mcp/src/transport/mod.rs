// Transports that feed raw requests into the dispatcher

pub mod stdio;

pub use stdio::{StdioHandle, StdioTransport, TransportState, DEFAULT_MAX_LINE_LENGTH};
