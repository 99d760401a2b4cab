//! Settings-tree merge primitives
//!
//! Merge semantics over `serde_json::Value`:
//! - Objects: deep-merge by key (recursive)
//! - Arrays: treated as atomic values (no implicit concatenation)
//! - Scalars: the winning side is decided by the caller's precedence

use serde_json::{Map, Value};

use crate::conflict::split_path;

/// Deep merge two JSON values, the overlay winning on disagreement.
pub fn deep_merge_prefer_last(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge_prefer_last(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Deep merge two JSON values, the base winning on disagreement.
///
/// Keys only present in the overlay are still added; existing values are
/// never overwritten.
pub fn deep_merge_prefer_first(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge_prefer_first(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, _) => base,
    }
}

/// Merge settings maps in source order under the given precedence.
pub fn merge_settings_maps(
    layers: &[&Map<String, Value>],
    prefer_last: bool,
) -> Map<String, Value> {
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        let overlay = Value::Object((*layer).clone());
        merged = if prefer_last {
            deep_merge_prefer_last(merged, overlay)
        } else {
            deep_merge_prefer_first(merged, overlay)
        };
    }
    match merged {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Set a value at a dotted path, creating intermediate objects as needed.
///
/// The path uses the same segment escaping as conflict paths: `\.` is a
/// literal dot inside a key.
pub fn set_at_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = split_path(path).into_iter().peekable();
    let mut current = map;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment, value);
            return;
        }
        let entry = current
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
}
