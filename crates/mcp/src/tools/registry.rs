// Tool registry: name -> handler, plus result normalization

use crate::error::{panic_message, McpError, McpResult};
use crate::protocol::{CallToolResult, ToolSchema};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Tool executor trait
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with the given arguments.
    ///
    /// Arguments are handed over exactly as the caller sent them. The returned
    /// value may already be a content envelope; anything else is wrapped.
    async fn execute(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// Adapter turning a closure into a [`Tool`].
pub struct FnTool<F> {
    handler: F,
}

impl<F> FnTool<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait::async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn execute(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.handler)(arguments)
    }
}

/// Tool registry for managing available tools
///
/// Lookups are exact and case-sensitive. Listing follows first registration
/// order; replacing a tool keeps its original position.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool, replacing any tool already registered under `name`.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> McpResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(McpError::Configuration(
                "tool name must not be empty".to_string(),
            ));
        }

        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool");
        } else {
            self.order.push(name);
        }
        Ok(())
    }

    /// Register a closure as a tool
    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F) -> McpResult<()>
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnTool::new(handler)))
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered names in listing order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// List all tool schemas
    pub fn list(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .map(|name| ToolSchema {
                name: name.clone(),
                description: format!("Tool: {}", name),
                input_schema: empty_input_schema(),
            })
            .collect()
    }

    /// Invoke a tool and normalize its output into a content envelope.
    pub async fn invoke(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::NotFound(name.to_string()))?;

        tracing::debug!(tool = %name, "Invoking tool");

        let outcome = AssertUnwindSafe(tool.execute(arguments))
            .catch_unwind()
            .await;

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "Tool failed");
                return Err(McpError::ToolExecution {
                    tool: name.to_string(),
                    message: format!("{:#}", e),
                });
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(tool = %name, %message, "Tool panicked");
                return Err(McpError::ToolExecution {
                    tool: name.to_string(),
                    message,
                });
            }
        };

        Ok(into_envelope(raw))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The schema advertised for every tool; arguments are never validated.
pub fn empty_input_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Coerce a raw handler result into a content envelope.
///
/// Values that already look like an envelope (an object whose `content` is a
/// list of typed items) pass through with every field intact; everything
/// else becomes one text item.
pub fn into_envelope(raw: Value) -> CallToolResult {
    if raw.get("content").is_some_and(Value::is_array) {
        if let Ok(envelope) = CallToolResult::deserialize(&raw) {
            return envelope;
        }
    }
    CallToolResult::text(stringify(&raw))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
