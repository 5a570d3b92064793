//! Tolerant field access over processor JSON payloads
//!
//! Paths are dot separated; numeric segments index into arrays
//! (`lines.data.0.plan.id`). Processor objects may be delivered either as a
//! bare id string or expanded into an object, so string reads on an object
//! fall back to its `id`.

use serde_json::Value;

use crate::error::{BillingError, BillingResult};

/// Walk a dot path, returning `None` for any missing or null segment
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

pub fn opt_str(root: &Value, path: &str) -> Option<String> {
    match lookup(root, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

pub fn opt_i64(root: &Value, path: &str) -> Option<i64> {
    match lookup(root, path)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn opt_bool(root: &Value, path: &str) -> Option<bool> {
    lookup(root, path)?.as_bool()
}

/// Read a string that must be present, reporting `name` when it is not
pub fn required_str(root: &Value, path: &str, name: &str) -> BillingResult<String> {
    opt_str(root, path).ok_or_else(|| BillingError::MissingField(name.to_string()))
}

pub fn required_i64(root: &Value, path: &str, name: &str) -> BillingResult<i64> {
    opt_i64(root, path).ok_or_else(|| BillingError::MissingField(name.to_string()))
}
