// Error taxonomy shared by the registry, dispatcher and transports

use crate::protocol::{JsonRpcError, INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR, TOOL_ERROR};

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Invalid construction arguments, fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed request payload.
    #[error("Parse error: {0}")]
    Decode(String),

    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Error executing tool '{tool}': {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Method not found: {0}")]
    UnsupportedMethod(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// JSON-RPC error code this failure is reported with.
    pub fn code(&self) -> i32 {
        match self {
            Self::Decode(_) => PARSE_ERROR,
            Self::NotFound(_) | Self::ToolExecution { .. } => TOOL_ERROR,
            Self::UnsupportedMethod(_) => METHOD_NOT_FOUND,
            Self::Configuration(_) | Self::Internal(_) | Self::Io(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::custom(self.code(), self.to_string())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(McpError::Decode("x".into()).code(), -32700);
        assert_eq!(McpError::NotFound("x".into()).code(), -32000);
        assert_eq!(
            McpError::ToolExecution {
                tool: "x".into(),
                message: "boom".into()
            }
            .code(),
            -32000
        );
        assert_eq!(McpError::UnsupportedMethod("x".into()).code(), -32601);
        assert_eq!(McpError::Internal("x".into()).code(), -32603);
    }

    #[test]
    fn test_rpc_error_messages() {
        let error = McpError::NotFound("missing".into()).to_rpc_error();
        assert_eq!(error.message, "Tool 'missing' not found");

        let error = McpError::UnsupportedMethod("foo/bar".into()).to_rpc_error();
        assert_eq!(error.message, "Method not found: foo/bar");
    }
}
