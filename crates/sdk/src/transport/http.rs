//! HTTP transport for posting JSON-RPC messages.

use crate::config::ClientConfig;
use crate::error::{SdkError, SdkResult};
use reqwest::{header, Client};
use serde_json::Value;
use std::sync::Arc;
use toolrpc_mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use toolrpc_mcp::sse::{SseParser, DEFAULT_EVENT_TYPE};
use tracing::{debug, warn};
use url::Url;

/// HTTP transport shared by the message poster and the event stream.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> SdkResult<Self> {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &config.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SdkError::Config(format!("Invalid header name '{}'", name)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|_| SdkError::Config(format!("Invalid value for header '{}'", name)))?;
            headers.insert(name, value);
        }

        // No overall timeout: the event stream stays open indefinitely.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// Underlying client, for callers that stream responses themselves.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// POST one message and return any responses carried in the reply body.
    ///
    /// Servers may answer inline (an SSE frame or plain JSON) or only on the
    /// event stream, in which case the body is empty and nothing is returned.
    pub async fn post_message(
        &self,
        url: &Url,
        message: &JsonRpcRequest,
    ) -> SdkResult<Vec<JsonRpcResponse>> {
        debug!(url = %url, method = %message.method, "POST message");

        let mut request = self.client.post(url.clone()).json(message);
        if let Some(limit) = self.config.request_timeout {
            request = request.timeout(limit);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SdkError::Timeout
            } else {
                SdkError::Http(e)
            }
        })?;

        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SdkError::from_response(status.as_u16(), &body));
        }

        if is_event_stream {
            Ok(responses_from_frames(&body))
        } else {
            Ok(responses_from_json(&body))
        }
    }
}

fn responses_from_frames(body: &str) -> Vec<JsonRpcResponse> {
    let mut parser = SseParser::new();
    let mut events = parser.feed(body.as_bytes());
    events.extend(parser.finish());

    events
        .into_iter()
        .filter(|event| event.event_type == DEFAULT_EVENT_TYPE)
        .filter_map(|event| event.data)
        .filter_map(|data| match serde_json::from_str(&data) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable message frame");
                None
            }
        })
        .collect()
}

fn responses_from_json(body: &str) -> Vec<JsonRpcResponse> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    let parsed = serde_json::from_str::<Value>(body).and_then(|value| match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<JsonRpcResponse>, _>>(),
        single => serde_json::from_value(single).map(|response| vec![response]),
    });
    match parsed {
        Ok(responses) => responses,
        Err(e) => {
            warn!(error = %e, "Ignoring non JSON-RPC reply body");
            Vec::new()
        }
    }
}
