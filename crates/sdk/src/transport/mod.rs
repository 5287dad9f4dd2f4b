//! Transport layer for the toolrpc SDK.

pub mod http;
pub mod sse;

pub use http::HttpTransport;
pub use sse::{EventSource, Listener, ERROR_EVENT};
