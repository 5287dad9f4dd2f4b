//! Correlation of outstanding requests with their responses.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use toolrpc_mcp::protocol::JsonRpcResponse;
use tracing::debug;

/// Requests awaiting a response, keyed by their JSON-encoded id.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<JsonRpcResponse>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `id` and return the receiver its response will be delivered on.
    pub fn register(&self, id: &Value) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.entries().insert(id.to_string(), tx);
        rx
    }

    /// Deliver a response to its waiter. Returns false if nobody was waiting.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let entry = self.entries().remove(&response.id.to_string());
        match entry {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                debug!(id = %response.id, "Dropping response with no pending request");
                false
            }
        }
    }

    /// Decode a `message` event payload and deliver it.
    pub fn resolve_json(&self, data: &str) -> bool {
        match serde_json::from_str::<JsonRpcResponse>(data) {
            Ok(response) => self.resolve(response),
            Err(e) => {
                debug!(error = %e, "Ignoring message that is not a JSON-RPC response");
                false
            }
        }
    }

    pub fn remove(&self, id: &Value) {
        self.entries().remove(&id.to_string());
    }

    /// Drop every entry; their receivers observe a closed channel.
    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
