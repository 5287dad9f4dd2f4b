use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use toolrpc_mcp::protocol::ServerInfo;
use toolrpc_mcp::transport::DEFAULT_MAX_LINE_LENGTH;
use toolrpc_mcp::{Dispatcher, McpError, McpResult};

/// Paths served by the router itself; the SSE paths must not collide with them.
const RESERVED_PATHS: [&str; 3] = ["/mcp", "/tools", "/health"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    #[serde(default)]
    pub sse: SseConfig,

    #[serde(default)]
    pub stdio: StdioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Required when serving over SSE.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_sse_path")]
    pub sse_path: String,

    #[serde(default = "default_message_path")]
    pub message_path: String,

    #[serde(default = "default_heartbeat")]
    pub heartbeat: bool,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioConfig {
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_name() -> String {
    "toolrpc".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Stdio
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_sse_path() -> String {
    "/sse".to_string()
}

fn default_message_path() -> String {
    "/mcp/message".to_string()
}

fn default_heartbeat() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            sse_path: default_sse_path(),
            message_path: default_message_path(),
            heartbeat: default_heartbeat(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            transport: default_transport(),
            sse: SseConfig::default(),
            stdio: StdioConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")
        } else {
            tracing::info!(
                path = %config_path.display(),
                "Configuration file not found, using defaults"
            );
            Ok(Self::default())
        }
    }

    /// Check the settings the selected transport depends on.
    pub fn validate(&self) -> McpResult<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::Configuration("server name must not be empty".into()));
        }

        if self.transport == TransportKind::Stdio {
            if self.stdio.max_line_length == 0 {
                return Err(McpError::Configuration(
                    "stdio.max_line_length must be greater than zero".into(),
                ));
            }
            return Ok(());
        }

        match self.sse.port {
            None => {
                return Err(McpError::Configuration(
                    "port is required for the sse transport".into(),
                ))
            }
            Some(0) => {
                return Err(McpError::Configuration(
                    "port must be between 1 and 65535".into(),
                ))
            }
            Some(_) => {}
        }

        for path in [&self.sse.sse_path, &self.sse.message_path] {
            if !path.starts_with('/') {
                return Err(McpError::Configuration(format!(
                    "path '{}' must start with '/'",
                    path
                )));
            }
            if RESERVED_PATHS.contains(&path.as_str()) {
                return Err(McpError::Configuration(format!(
                    "path '{}' is reserved",
                    path
                )));
            }
        }
        if self.sse.sse_path == self.sse.message_path {
            return Err(McpError::Configuration(
                "sse_path and message_path must differ".into(),
            ));
        }

        if self.sse.heartbeat && self.sse.heartbeat_interval_secs == 0 {
            return Err(McpError::Configuration(
                "heartbeat_interval_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Address the SSE listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.sse.host, self.sse.port.unwrap_or_default())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sse_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.transport = TransportKind::Sse;
        config.sse.port = Some(8080);
        config
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.sse.sse_path, "/sse");
        assert_eq!(config.sse.message_path, "/mcp/message");
        assert_eq!(config.sse.heartbeat_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::load(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.name, "toolrpc");
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toolrpc.toml");
        std::fs::write(
            &path,
            r#"
name = "calculator"
transport = "sse"

[sse]
port = 9000
heartbeat = false
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.name, "calculator");
        assert_eq!(config.transport, TransportKind::Sse);
        assert_eq!(config.sse.port, Some(9000));
        assert!(!config.sse.heartbeat);
        assert_eq!(config.sse.message_path, "/mcp/message");
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let parsed: Result<ServerConfig, _> = toml::from_str(r#"transport = "websocket""#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_sse_requires_port() {
        let mut config = sse_config();
        config.sse.port = None;
        assert!(matches!(config.validate(), Err(McpError::Configuration(_))));

        config.sse.port = Some(0);
        assert!(matches!(config.validate(), Err(McpError::Configuration(_))));
    }

    #[test]
    fn test_sse_paths_validated() {
        let mut config = sse_config();
        config.sse.message_path = "mcp/message".into();
        assert!(config.validate().is_err());

        let mut config = sse_config();
        config.sse.message_path = "/sse".into();
        assert!(config.validate().is_err());

        let mut config = sse_config();
        config.sse.message_path = "/health".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_interval_validated() {
        let mut config = sse_config();
        config.sse.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());

        config.sse.heartbeat = false;
        assert!(config.validate().is_ok());
    }
}
