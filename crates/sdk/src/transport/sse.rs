//! Reconnecting Server-Sent Events reader.

use crate::error::{SdkError, SdkResult};
use futures_util::StreamExt;
use reqwest::{header, Client};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolrpc_mcp::sse::{SseEvent, SseParser};
use tracing::{debug, info, warn};
use url::Url;

/// Event type dispatched when the stream fails or ends.
pub const ERROR_EVENT: &str = "error";

/// Callback invoked with the event data, or with the error for `error` events.
pub type Listener = Arc<dyn Fn(Option<&str>, Option<&SdkError>) + Send + Sync>;

type ListenerMap = Arc<RwLock<HashMap<String, Vec<Listener>>>>;

/// Event stream reader with automatic reconnection.
///
/// One background task owns the connection. When the stream drops it waits
/// for the server's `retry:` delay (or the configured default) and reconnects,
/// resending the last seen event id as `Last-Event-ID`.
pub struct EventSource {
    url: Url,
    client: Client,
    reconnect_delay: Duration,
    idle_timeout: Option<Duration>,
    listeners: ListenerMap,
    last_event_id: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventSource {
    pub fn new(
        url: Url,
        client: Client,
        reconnect_delay: Duration,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            url,
            client,
            reconnect_delay,
            idle_timeout,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            last_event_id: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Register a listener for an event type. Several listeners may share a type.
    pub fn on(&self, event_type: impl Into<String>, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type.into())
            .or_default()
            .push(listener);
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Spawn the read loop. Calling this while the loop runs is a no-op.
    pub fn start(&self) -> SdkResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SdkError::Closed);
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let reader = ReadLoop {
            url: self.url.clone(),
            client: self.client.clone(),
            reconnect_delay: self.reconnect_delay,
            idle_timeout: self.idle_timeout,
            listeners: self.listeners.clone(),
            last_event_id: self.last_event_id.clone(),
            cancel: self.cancel.clone(),
        };
        *task = Some(tokio::spawn(reader.run()));
        Ok(())
    }

    /// Stop the read loop and wait for it to exit. The source cannot be restarted.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        debug!(url = %self.url, "Event source closed");
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Id of the most recent event carrying an `id:` field.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ReadLoop {
    url: Url,
    client: Client,
    reconnect_delay: Duration,
    idle_timeout: Option<Duration>,
    listeners: ListenerMap,
    last_event_id: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
}

impl ReadLoop {
    async fn run(self) {
        // The parser outlives individual connections so `id` and `retry` survive.
        let mut parser = SseParser::new();

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                outcome = self.read_connection(&mut parser) => outcome,
            };

            let reason = match outcome {
                Ok(()) => "event stream ended".to_string(),
                Err(e) => e.to_string(),
            };
            warn!(url = %self.url, reason = %reason, "Event stream disconnected");
            self.emit(ERROR_EVENT, None, Some(&SdkError::Connection(reason)));

            let delay = parser
                .retry()
                .map(Duration::from_millis)
                .unwrap_or(self.reconnect_delay);
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn read_connection(&self, parser: &mut SseParser) -> SdkResult<()> {
        parser.reset_stream();

        let mut request = self
            .client
            .get(self.url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        if let Some(id) = parser.last_event_id().filter(|id| !id.is_empty()) {
            request = request.header("Last-Event-ID", id);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::from_response(status.as_u16(), &body));
        }
        info!(url = %self.url, "Event stream connected");

        let mut body = response.bytes_stream();
        loop {
            let next = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, body.next())
                    .await
                    .map_err(|_| SdkError::Timeout)?,
                None => body.next().await,
            };
            let Some(chunk) = next else {
                return Ok(());
            };

            for event in parser.feed(&chunk?) {
                self.dispatch(&event);
            }
        }
    }

    fn dispatch(&self, event: &SseEvent) {
        if let Some(id) = &event.id {
            *self
                .last_event_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        }
        debug!(event_type = %event.event_type, "Event received");
        self.emit(&event.event_type, event.data.as_deref(), None);
    }

    fn emit(&self, event_type: &str, data: Option<&str>, error: Option<&SdkError>) {
        // Snapshot so listeners may register more listeners.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            // A panicking listener must not take the read loop down with it.
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(data, error))) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(event_type = event_type, panic = %message, "Event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn channel_listener(tx: mpsc::UnboundedSender<Option<String>>) -> Listener {
        Arc::new(move |data, _| {
            let _ = tx.send(data.map(str::to_string));
        })
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&request).to_lowercase()
    }

    const STREAM_HEADERS: &[u8] =
        b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";

    #[tokio::test]
    async fn test_endpoint_event_dispatched() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sse"))
            .and(header_matcher("accept", "text/event-stream"))
            .and(header_matcher("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                ": comment\nevent: endpoint\ndata: /mcp/message\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
        let source = EventSource::new(url, Client::new(), Duration::from_millis(50), None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.on("endpoint", channel_listener(tx));
        source.start().unwrap();
        assert!(source.is_running());

        let data = tokio::time::timeout(TEST_TIMEOUT, rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.as_deref(), Some("/mcp/message"));

        source.close().await;
        assert!(!source.is_running());
        assert!(matches!(source.start(), Err(SdkError::Closed)));
    }

    #[tokio::test]
    async fn test_reconnect_resumes_with_last_event_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/sse", listener.local_addr().unwrap())).unwrap();

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            read_request(&mut first).await;
            first.write_all(STREAM_HEADERS).await.unwrap();
            first
                .write_all(b"retry: 100\nid: 42\ndata: first\n\n")
                .await
                .unwrap();
            first.shutdown().await.unwrap();
            drop(first);
            let dropped_at = Instant::now();

            let (mut second, _) = listener.accept().await.unwrap();
            let waited = dropped_at.elapsed();
            let request = read_request(&mut second).await;
            second.write_all(STREAM_HEADERS).await.unwrap();
            second.write_all(b"data: second\n\n").await.unwrap();
            (waited, request, second)
        });

        // Default delay is far longer than the server-provided one.
        let source = EventSource::new(url, Client::new(), Duration::from_secs(30), None);
        let (tx, mut messages) = mpsc::unbounded_channel();
        source.on("message", channel_listener(tx));
        let (tx, mut errors) = mpsc::unbounded_channel();
        source.on(ERROR_EVENT, channel_listener(tx));
        source.start().unwrap();

        let first = tokio::time::timeout(TEST_TIMEOUT, messages.recv()).await.unwrap();
        assert_eq!(first.flatten().as_deref(), Some("first"));
        tokio::time::timeout(TEST_TIMEOUT, errors.recv())
            .await
            .unwrap()
            .unwrap();

        let second = tokio::time::timeout(TEST_TIMEOUT, messages.recv()).await.unwrap();
        assert_eq!(second.flatten().as_deref(), Some("second"));
        assert_eq!(source.last_event_id().as_deref(), Some("42"));

        let (waited, request, _conn) = server.await.unwrap();
        assert!(waited >= Duration::from_millis(100), "reconnected after {waited:?}");
        assert!(waited < Duration::from_secs(1), "reconnected after {waited:?}");
        assert!(request.contains("last-event-id: 42"));

        source.close().await;
    }

    #[tokio::test]
    async fn test_panicking_listener_keeps_loop_alive() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: one\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
        let source = EventSource::new(url, Client::new(), Duration::from_millis(20), None);
        source.on("message", Arc::new(|_, _| panic!("listener bug")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.on("message", channel_listener(tx));
        source.start().unwrap();

        // Delivered on the first connection and again after a reconnect.
        for _ in 0..2 {
            let data = tokio::time::timeout(TEST_TIMEOUT, rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(data.as_deref(), Some("one"));
        }
        assert!(source.is_running());
        assert_eq!(source.listener_count("message"), 2);

        source.close().await;
    }

    #[tokio::test]
    async fn test_error_status_dispatches_error_event() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
        let source = EventSource::new(url, Client::new(), Duration::from_millis(20), None);
        let (tx, mut errors) = mpsc::unbounded_channel();
        let errors_tx = tx.clone();
        source.on(
            ERROR_EVENT,
            Arc::new(move |_, error| {
                let _ = errors_tx.send(error.map(|e| e.to_string()));
            }),
        );
        drop(tx);
        source.start().unwrap();

        let error = tokio::time::timeout(TEST_TIMEOUT, errors.recv())
            .await
            .unwrap()
            .flatten()
            .unwrap();
        assert!(error.contains("500"), "unexpected error: {error}");

        // Keeps retrying after a failed attempt.
        tokio::time::timeout(TEST_TIMEOUT, errors.recv())
            .await
            .unwrap();
        assert!(source.is_running());

        source.close().await;
    }
}
