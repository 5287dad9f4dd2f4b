//! Main client for the toolrpc SDK.

use crate::config::ClientConfig;
use crate::error::{SdkError, SdkResult};
use crate::pending::PendingRequests;
use crate::transport::{EventSource, HttpTransport};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use toolrpc_mcp::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcRequest, ListToolsResult, ToolSchema, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};
use url::Url;

/// Client for a toolrpc server speaking JSON-RPC over Server-Sent Events.
///
/// Requests are POSTed to the endpoint announced on the event stream;
/// responses are matched back to callers by id, whether they arrive on the
/// stream or in the POST reply.
pub struct McpClient {
    config: Arc<ClientConfig>,
    http: HttpTransport,
    events: EventSource,
    endpoint: Arc<watch::Sender<Option<Url>>>,
    pending: PendingRequests,
    next_id: AtomicU64,
    connected: AtomicBool,
    shutdown: CancellationToken,
}

impl McpClient {
    /// Create a new client builder.
    pub fn builder() -> McpClientBuilder {
        McpClientBuilder::new()
    }

    /// Create a client from configuration.
    pub fn from_config(config: ClientConfig) -> SdkResult<Self> {
        let config = Arc::new(config);
        let http = HttpTransport::new(config.clone())?;
        let events = EventSource::new(
            config.sse_url.clone(),
            http.client().clone(),
            config.reconnect_delay,
            config.idle_timeout,
        );
        let (endpoint, _) = watch::channel(None);

        Ok(Self {
            config,
            http,
            events,
            endpoint: Arc::new(endpoint),
            pending: PendingRequests::new(),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the event stream and start routing its events.
    ///
    /// Listeners are registered once; later calls only restart a read loop
    /// that has exited.
    pub async fn connect(&self) -> SdkResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(SdkError::Closed);
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return self.events.start();
        }

        let base = self.config.sse_url.clone();
        let endpoint = self.endpoint.clone();
        self.events.on(
            "endpoint",
            Arc::new(move |data, _| {
                let Some(path) = data.map(str::trim).filter(|path| !path.is_empty()) else {
                    return;
                };
                match base.join(path) {
                    Ok(url) => {
                        info!(endpoint = %url, "Message endpoint announced");
                        endpoint.send_replace(Some(url));
                    }
                    Err(e) => warn!(endpoint = path, error = %e, "Invalid endpoint announced"),
                }
            }),
        );

        let pending = self.pending.clone();
        self.events.on(
            "message",
            Arc::new(move |data, _| {
                if let Some(data) = data {
                    pending.resolve_json(data);
                }
            }),
        );

        info!(url = %self.config.sse_url, "Connecting to event stream");
        self.events.start()
    }

    /// Message endpoint announced by the server, if any yet.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.borrow().clone()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    async fn wait_for_endpoint(&self) -> SdkResult<Url> {
        let mut receiver = self.endpoint.subscribe();
        let announced = async {
            receiver
                .wait_for(Option::is_some)
                .await
                .map(|url| url.clone())
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(SdkError::Closed),
            result = announced => result
                .ok()
                .flatten()
                .ok_or(SdkError::Closed),
        }
    }

    /// Send a request and wait for its result.
    ///
    /// JSON-RPC error responses become [`SdkError::Rpc`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> SdkResult<Value> {
        if self.shutdown.is_cancelled() {
            return Err(SdkError::Closed);
        }
        let endpoint = self.wait_for_endpoint().await?;

        let id = Value::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let receiver = self.pending.register(&id);
        debug!(method = method, id = %id, "Sending request");

        match self.http.post_message(&endpoint, &request).await {
            Ok(inline) => {
                for response in inline {
                    self.pending.resolve(response);
                }
            }
            Err(e) => {
                self.pending.remove(&id);
                return Err(e);
            }
        }

        let delivered = async {
            match self.config.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, receiver).await {
                    Ok(received) => received.map_err(|_| SdkError::Closed),
                    Err(_) => Err(SdkError::Timeout),
                },
                None => receiver.await.map_err(|_| SdkError::Closed),
            }
        };
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Err(SdkError::Closed),
            outcome = delivered => outcome,
        };

        match outcome {
            Ok(response) => response.into_result().map_err(SdkError::from),
            Err(e) => {
                self.pending.remove(&id);
                Err(e)
            }
        }
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> SdkResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(SdkError::Closed);
        }
        let endpoint = self.wait_for_endpoint().await?;
        let notification = JsonRpcRequest::notification(method, params);
        debug!(method = method, "Sending notification");
        self.http.post_message(&endpoint, &notification).await?;
        Ok(())
    }

    /// Perform the `initialize` handshake.
    pub async fn start(&self) -> SdkResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.config.client_info.clone(),
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        self.notify("notifications/initialized", None).await?;
        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            "Session initialized"
        );
        Ok(result)
    }

    pub async fn list_tools(&self) -> SdkResult<Vec<ToolSchema>> {
        let result = self.request("tools/list", Some(json!({}))).await?;
        let listed: ListToolsResult = serde_json::from_value(result)?;
        Ok(listed.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> SdkResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Stop the event stream and fail every outstanding request with `Closed`.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.events.close().await;
        self.pending.clear();
        info!(url = %self.config.sse_url, "Client closed");
    }
}

/// Builder for creating an McpClient.
pub struct McpClientBuilder {
    url: Option<String>,
    headers: Vec<(String, String)>,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Option<Duration>>,
    reconnect_delay: Option<Duration>,
    request_timeout: Option<Duration>,
    client_info: Option<ClientInfo>,
}

impl McpClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            url: None,
            headers: Vec::new(),
            connect_timeout: None,
            idle_timeout: None,
            reconnect_delay: None,
            request_timeout: None,
            client_info: None,
        }
    }

    /// Set the URL of the server's event stream.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Maximum silence on the event stream; `None` disables the check.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Some(ClientInfo {
            name: name.into(),
            version: version.into(),
        });
        self
    }

    /// Build the client.
    pub fn build(self) -> SdkResult<McpClient> {
        let url_str = self
            .url
            .ok_or_else(|| SdkError::Config("url is required".to_string()))?;
        let url = Url::parse(&url_str)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SdkError::Config(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let mut config = ClientConfig::new(url);
        config.headers = self.headers;
        config.request_timeout = self.request_timeout;
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = timeout;
        }
        if let Some(delay) = self.reconnect_delay {
            config.reconnect_delay = delay;
        }
        if let Some(info) = self.client_info {
            config.client_info = info;
        }

        McpClient::from_config(config)
    }
}

impl Default for McpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn frame(body: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(format!("data: {}\n\n", body), "text/event-stream")
    }

    async fn mock_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "event: endpoint\ndata: /mcp/message\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        server
    }

    fn client_for(server: &MockServer) -> McpClient {
        McpClient::builder()
            .url(format!("{}/sse", server.uri()))
            .reconnect_delay(Duration::from_millis(50))
            .client_info("test-client", "0.0.1")
            .build()
            .unwrap()
    }

    /// Read one HTTP request, returning the lowercased head and the body.
    async fn read_http_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        let head_end = loop {
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed mid-request");
            data.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&data[..head_end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|value| value.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while data.len() < head_end + length {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            data.extend_from_slice(&buf[..n]);
        }
        let body = data[head_end..head_end + length].to_vec();
        (head, body)
    }

    #[test]
    fn test_builder_requires_url() {
        assert!(matches!(
            McpClient::builder().build(),
            Err(SdkError::Config(_))
        ));
        assert!(matches!(
            McpClient::builder().url("not a url").build(),
            Err(SdkError::InvalidUrl(_))
        ));
        assert!(matches!(
            McpClient::builder().url("ftp://host/sse").build(),
            Err(SdkError::Config(_))
        ));
    }

    #[test]
    fn test_builder_overrides() {
        let client = McpClient::builder()
            .url("http://localhost:8080/sse")
            .header("x-api-key", "secret")
            .request_timeout(Duration::from_secs(2))
            .idle_timeout(None)
            .build()
            .unwrap();

        let config = client.config();
        assert_eq!(
            config.headers,
            vec![(String::from("x-api-key"), String::from("secret"))]
        );
        assert_eq!(config.request_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_start_initializes_session() {
        let server = mock_server().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .and(body_partial_json(json!({
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "test-client", "version": "0.0.1"}
                }
            })))
            .respond_with(frame(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "toolrpc", "version": "0.1.0"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.connect().await.unwrap();
        let result = tokio::time::timeout(TEST_TIMEOUT, client.start())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.server_info.name, "toolrpc");
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            format!("{}/mcp/message", server.uri())
        );
        assert_eq!(client.pending_requests(), 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_response_on_event_stream_resolves_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (head, _) = read_http_request(&mut stream).await;
            assert!(head.starts_with("get /sse"), "unexpected request: {head}");
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
                      event: endpoint\ndata: /mcp/message\n\n",
                )
                .await
                .unwrap();

            // Accept the POST without an inline answer
            let (mut post, _) = listener.accept().await.unwrap();
            let (head, body) = read_http_request(&mut post).await;
            assert!(head.starts_with("post /mcp/message"), "unexpected request: {head}");
            let request: Value = serde_json::from_slice(&body).unwrap();
            post.write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();

            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"tools": []}});
            stream
                .write_all(format!("event: message\ndata: {}\n\n", reply).as_bytes())
                .await
                .unwrap();
            (request, stream, post)
        });

        let client = McpClient::builder()
            .url(format!("http://{}/sse", addr))
            .build()
            .unwrap();
        client.connect().await.unwrap();

        let pending = client.request("tools/list", Some(json!({})));
        let result = tokio::time::timeout(TEST_TIMEOUT, pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert_eq!(client.pending_requests(), 0);

        let (request, _stream, _post) = server.await.unwrap();
        assert_eq!(request["method"], "tools/list");
        assert_eq!(request["id"], 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_connect_twice_registers_listeners_once() {
        let server = mock_server().await;
        let client = client_for(&server);

        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.events.listener_count("endpoint"), 1);
        assert_eq!(client.events.listener_count("message"), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_call_tool() {
        let server = mock_server().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .and(body_partial_json(json!({
                "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 15, "b": 25}}
            })))
            .respond_with(frame(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"content": [{"type": "text", "text": "40"}]}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.connect().await.unwrap();
        let result = tokio::time::timeout(
            TEST_TIMEOUT,
            client.call_tool("add", json!({"a": 15, "b": 25})),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result.joined_text(), "40");
        client.close().await;
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let server = mock_server().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .respond_with(frame(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "Tool 'nope' not found"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.connect().await.unwrap();
        let err = tokio::time::timeout(TEST_TIMEOUT, client.call_tool("nope", json!({})))
            .await
            .unwrap()
            .unwrap_err();

        match err {
            SdkError::Rpc { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "Tool 'nope' not found");
            }
            other => panic!("unexpected: {other:?}"),
        }
        client.close().await;
    }

    #[tokio::test]
    async fn test_request_timeout_removes_pending_entry() {
        let server = mock_server().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = McpClient::builder()
            .url(format!("{}/sse", server.uri()))
            .reconnect_delay(Duration::from_millis(50))
            .request_timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        client.connect().await.unwrap();

        let err = client.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, SdkError::Timeout));
        assert_eq!(client.pending_requests(), 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_requests() {
        let server = mock_server().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = Arc::new(client_for(&server));
        client.connect().await.unwrap();

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.request("tools/list", None).await })
        };
        tokio::time::timeout(TEST_TIMEOUT, async {
            while client.pending_requests() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        client.close().await;
        let result = tokio::time::timeout(TEST_TIMEOUT, waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SdkError::Closed)));
        assert!(matches!(
            client.request("tools/list", None).await,
            Err(SdkError::Closed)
        ));
    }
}
