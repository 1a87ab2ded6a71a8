use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MeshflowError, Result};

/// Context key under which a node's result is stored.
pub fn output_key(node_id: &str) -> String {
    format!("{}_output", node_id)
}

/// Context key under which a failed node's error is stored for its handler.
pub fn error_key(node_id: &str) -> String {
    format!("{}_error", node_id)
}

/// Shared key/value state for one workflow run.
///
/// Top-level keys are plain strings; values are JSON. Paths such as
/// `p_output.result.score` address into nested objects, with the first
/// segment naming the top-level key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    data: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from initial data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// Create a context from a JSON object. Non-object values yield an empty context.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(obj) => Self {
                data: obj.into_iter().collect(),
            },
            _ => Self::default(),
        }
    }

    /// Get a top-level value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a top-level value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Set a top-level value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Set a top-level string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    /// Merge another context into this one (overwrites on conflict).
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Resolve a dot-separated path. Numeric segments index into arrays.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(obj) => obj.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at a dot-separated path, creating intermediate objects.
    ///
    /// A `null` intermediate is replaced by an object; any other non-object
    /// intermediate is an error and leaves the context unchanged.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(MeshflowError::Context(format!("invalid path '{}'", path)));
        }
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| MeshflowError::Context("empty path".into()))?;

        if parents.is_empty() {
            self.data.insert(last.to_string(), value);
            return Ok(());
        }

        // Check the whole chain before mutating anything.
        let mut cursor = self.data.get(parents[0]);
        for segment in &parents[1..] {
            match cursor {
                Some(Value::Object(obj)) => cursor = obj.get(*segment),
                Some(Value::Null) | None => break,
                Some(_) => {
                    return Err(MeshflowError::Context(format!(
                        "path segment before '{}' in '{}' is not an object",
                        segment, path
                    )))
                }
            }
        }
        if let Some(v) = cursor {
            if !matches!(v, Value::Object(_) | Value::Null) {
                return Err(MeshflowError::Context(format!(
                    "path '{}' crosses a non-object value",
                    path
                )));
            }
        }

        let mut current = self
            .data
            .entry(parents[0].to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        for segment in &parents[1..] {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            current = current
                .as_object_mut()
                .ok_or_else(|| MeshflowError::Context(format!("'{}' is not an object", segment)))?
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current
            .as_object_mut()
            .ok_or_else(|| MeshflowError::Context(format!("'{}' has no object parent", last)))?
            .insert(last.to_string(), value);
        Ok(())
    }

    /// Snapshot of the whole context as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("name", "Alice");
        ctx.set("count", json!(42));

        assert_eq!(ctx.get_str("name"), Some("Alice"));
        assert_eq!(ctx.get("count"), Some(&json!(42)));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_merge() {
        let mut ctx1 = ExecutionContext::new();
        ctx1.set_str("a", "1");
        ctx1.set_str("b", "2");

        let mut ctx2 = ExecutionContext::new();
        ctx2.set_str("b", "overwritten");
        ctx2.set_str("c", "3");

        ctx1.merge(&ctx2);

        assert_eq!(ctx1.get_str("a"), Some("1"));
        assert_eq!(ctx1.get_str("b"), Some("overwritten"));
        assert_eq!(ctx1.get_str("c"), Some("3"));
    }

    #[test]
    fn test_resolve_nested_path() {
        let ctx = ExecutionContext::from_value(json!({
            "p_output": {"result": {"score": 0.9}, "tags": ["x", "y"]}
        }));

        assert_eq!(ctx.resolve_path("p_output.result.score"), Some(&json!(0.9)));
        assert_eq!(ctx.resolve_path("p_output.tags.1"), Some(&json!("y")));
        assert_eq!(ctx.resolve_path("p_output.nope"), None);
        assert_eq!(ctx.resolve_path("missing.path"), None);
    }

    #[test]
    fn test_set_path_creates_intermediate_levels() {
        let mut ctx = ExecutionContext::new();
        ctx.set_path("input.text.body", json!("hello")).unwrap();
        assert_eq!(ctx.get("input"), Some(&json!({"text": {"body": "hello"}})));

        ctx.set_path("input.text.lang", json!("en")).unwrap();
        assert_eq!(ctx.resolve_path("input.text.lang"), Some(&json!("en")));
        assert_eq!(ctx.resolve_path("input.text.body"), Some(&json!("hello")));
    }

    #[test]
    fn test_set_path_replaces_null_intermediate() {
        let mut ctx = ExecutionContext::from_value(json!({"a": null}));
        ctx.set_path("a.b", json!(1)).unwrap();
        assert_eq!(ctx.get("a"), Some(&json!({"b": 1})));
    }

    #[test]
    fn test_set_path_rejects_scalar_intermediate() {
        let mut ctx = ExecutionContext::from_value(json!({"a": {"b": 5}}));
        assert!(ctx.set_path("a.b.c", json!(1)).is_err());
        assert_eq!(ctx.get("a"), Some(&json!({"b": 5})));
        assert!(ctx.set_path("a..c", json!(1)).is_err());
    }

    #[test]
    fn test_output_and_error_keys() {
        assert_eq!(output_key("node1"), "node1_output");
        assert_eq!(error_key("node1"), "node1_error");
    }

    #[test]
    fn test_from_value_non_object() {
        assert!(ExecutionContext::from_value(json!([1, 2])).is_empty());
    }
}
