//! Configuration types for the toolrpc SDK.

use std::time::Duration;
use toolrpc_mcp::protocol::ClientInfo;
use url::Url;

/// Delay before reconnecting when the server has not sent a `retry:` field.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the server's event stream (e.g. `http://localhost:8080/sse`).
    pub sse_url: Url,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Maximum silence on the event stream before it is treated as dead.
    pub idle_timeout: Option<Duration>,
    /// Delay before reconnecting, until the server overrides it.
    pub reconnect_delay: Duration,
    /// Per-request response deadline; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Identity sent during `initialize`.
    pub client_info: ClientInfo,
}

impl ClientConfig {
    /// Create a new configuration for the given event stream URL.
    pub fn new(sse_url: Url) -> Self {
        Self {
            sse_url,
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(60)),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: None,
            client_info: ClientInfo {
                name: "toolrpc-sdk".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let url = Url::parse("http://localhost:8080/sse").unwrap();
        let config = ClientConfig::new(url.clone());

        assert_eq!(config.sse_url, url);
        assert!(config.headers.is_empty());
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
        assert!(config.request_timeout.is_none());
        assert_eq!(config.client_info.name, "toolrpc-sdk");
    }
}
