// JSON-RPC request routing shared by every transport

use crate::error::{panic_message, McpError, McpResult};
use crate::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolsCapability, PROTOCOL_VERSION,
};
use crate::tools::ToolRegistry;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Stateless router from decoded requests to registry calls.
///
/// Every request produces exactly one response, and the response always
/// carries the request's `id` (or `null` when it had none).
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    info: ServerInfo,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, info: ServerInfo) -> Self {
        Self { registry, info }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// Decode a raw request body and dispatch it.
    ///
    /// Invalid JSON yields a parse error with a `null` id. JSON that is not a
    /// request object is reported as an internal error, keeping its `id` when
    /// one can be recovered.
    pub async fn handle_raw(&self, raw: &[u8]) -> JsonRpcResponse {
        let value: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode request");
                return JsonRpcResponse::error(
                    Value::Null,
                    McpError::Decode(e.to_string()).to_rpc_error(),
                );
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        if let Some(method) = value.get("method").filter(|m| !m.is_string()) {
            let err = McpError::UnsupportedMethod(scalar_text(method));
            tracing::debug!(error = %err, "Rejecting non-string method");
            return JsonRpcResponse::error(id, err.to_rpc_error());
        }
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "Request is not a JSON-RPC object");
                JsonRpcResponse::error(
                    id,
                    McpError::Internal(format!("invalid request: {}", e)).to_rpc_error(),
                )
            }
        }
    }

    /// Dispatch a decoded request.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        tracing::debug!(method = %request.method, id = %id, "Handling request");

        match AssertUnwindSafe(self.route(request)).catch_unwind().await {
            Ok(Ok(result)) => JsonRpcResponse::success(id, result),
            Ok(Err(err)) => JsonRpcResponse::error(id, err.to_rpc_error()),
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(%message, "Dispatcher panicked");
                JsonRpcResponse::error(id, McpError::Internal(message).to_rpc_error())
            }
        }
    }

    async fn route(&self, request: JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            "tools/list" => to_value(ListToolsResult {
                tools: self.registry.list(),
            }),
            "tools/call" => {
                // Non-string names are looked up by their text form.
                let params = request.params.unwrap_or(Value::Null);
                let name = params.get("name").map(scalar_text).unwrap_or_default();
                let arguments = match params.get("arguments") {
                    None | Some(Value::Null) => json!({}),
                    Some(arguments) => arguments.clone(),
                };
                let result = self.registry.invoke(&name, arguments).await?;
                to_value(result)
            }
            "initialize" => to_value(InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: false,
                    }),
                },
                server_info: self.info.clone(),
            }),
            "ping" | "notifications/initialized" => Ok(json!({})),
            other => Err(McpError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Text form of a scalar used where a string was expected.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_value(value: impl Serialize) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::Internal(e.to_string()))
}
