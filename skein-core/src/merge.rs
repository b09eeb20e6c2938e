//! Deep merge for JSON values.
//!
//! Used for layering configuration defaults under step templates and for
//! accumulating results across retries. Nested mappings merge recursively,
//! a non-mapping right value replaces the left, and lists concatenate.

use serde_json::{Map, Value};

/// Merges `right` into `left`, returning the combined value.
pub fn deep_merge(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(left), Value::Object(right)) => {
            Value::Object(merge_maps(left, right))
        }
        (Value::Array(mut left), Value::Array(right)) => {
            left.extend(right);
            Value::Array(left)
        }
        (_, right) => right,
    }
}

/// Merges `right` into `left` for JSON object maps.
pub fn merge_maps(mut left: Map<String, Value>, right: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in right {
        match left.remove(&key) {
            Some(existing) => {
                left.insert(key, deep_merge(existing, value));
            }
            None => {
                left.insert(key, value);
            }
        }
    }
    left
}
