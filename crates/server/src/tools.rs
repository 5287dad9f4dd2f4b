// Built-in tools shipped with the binary

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::{json, Value};
use toolrpc_mcp::{McpResult, ToolRegistry};

/// Registry with the stock arithmetic, greeting and clock tools.
pub fn builtin_registry() -> McpResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register_fn("add", |args| {
        arithmetic(&args, "a", "b", 0, |x, y| x + y, |x, y| x.checked_add(y))
    })?;
    registry.register_fn("multiply", |args| {
        arithmetic(&args, "x", "y", 1, |x, y| x * y, |x, y| x.checked_mul(y))
    })?;
    registry.register_fn("greet", |args| {
        let name = args.get("name").and_then(Value::as_str).unwrap_or("World");
        Ok(json!(format!("Hello, {}!", name)))
    })?;
    registry.register_fn("echo", Ok)?;
    registry.register_fn("current_time", |args| {
        let timezone = args.get("timezone").and_then(Value::as_str).unwrap_or("UTC");
        if !timezone.eq_ignore_ascii_case("UTC") {
            bail!("unsupported timezone '{}', only UTC is available", timezone);
        }
        Ok(json!(Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()))
    })?;
    Ok(registry)
}

/// Apply a binary operation to two numeric arguments, staying in integers
/// when both operands are integers.
fn arithmetic(
    args: &Value,
    left: &str,
    right: &str,
    missing: i64,
    float_op: fn(f64, f64) -> f64,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<Value> {
    let operand = |key: &str| -> Result<Value> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(json!(missing)),
            Some(value @ Value::Number(_)) => Ok(value.clone()),
            Some(other) => bail!("argument '{}' must be a number, got {}", key, other),
        }
    };
    let (a, b) = (operand(left)?, operand(right)?);

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Ok(json!(result));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(float_op(x, y))),
        _ => bail!("arguments out of range"),
    }
}
