//! Error types for the toolrpc SDK.

use toolrpc_mcp::protocol::JsonRpcError;

/// Result type for SDK operations.
pub type SdkResult<T> = Result<T, SdkError>;

/// Error types that can occur when talking to a toolrpc server.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The server returned a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The event stream failed or ended.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response or data within the configured limit.
    #[error("Request timed out")]
    Timeout,

    /// The client was closed while the operation was pending.
    #[error("Client closed")]
    Closed,

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl SdkError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Connection(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Create an API error from a status code and response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            "empty response body".to_string()
        } else {
            body.trim().to_string()
        };
        Self::Api { status, message }
    }
}

impl From<JsonRpcError> for SdkError {
    fn from(error: JsonRpcError) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}
