// SSE transport: endpoint announcement stream + one-shot framed message replies

use crate::config::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use toolrpc_mcp::sse::SseEvent;
use uuid::Uuid;

const EVENT_STREAM: &str = "text/event-stream";

/// Logs when the client goes away and hyper drops the stream.
struct ConnectionGuard {
    id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        tracing::info!(connection_id = %self.id, "SSE client disconnected");
    }
}

/// `GET /sse`: announce the message endpoint, then send heartbeats until the
/// client disconnects.
pub async fn stream_endpoint(State(state): State<Arc<AppState>>) -> Response {
    let id = Uuid::new_v4();
    tracing::info!(connection_id = %id, "SSE client connected");

    let announcement = SseEvent::new("endpoint", state.config.sse.message_path.clone());
    let heartbeat = state
        .config
        .sse
        .heartbeat
        .then(|| Duration::from_secs(state.config.sse.heartbeat_interval_secs));

    let stream = async_stream::stream! {
        let _guard = ConnectionGuard { id };
        yield Ok::<_, Infallible>(announcement.encode());

        if let Some(period) = heartbeat {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let payload = serde_json::json!({
                    "type": "heartbeat",
                    "timestamp": Utc::now().timestamp(),
                });
                tracing::trace!(connection_id = %id, "Sending heartbeat");
                yield Ok(SseEvent::new("heartbeat", payload.to_string()).encode());
            }
        } else {
            // Hold the connection open until the client drops it.
            std::future::pending::<()>().await;
        }
    };

    (
        [
            (header::CONTENT_TYPE, EVENT_STREAM),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `POST /mcp/message`: dispatch one request, reply with a single data frame.
pub async fn post_message(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let response = state.dispatcher.handle_raw(&body).await;
    let frame = SseEvent::message(response.encode()).encode();

    (
        [
            (header::CONTENT_TYPE, EVENT_STREAM),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        frame,
    )
        .into_response()
}
