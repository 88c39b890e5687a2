//! # JSON Document Helpers
//!
//! Merge primitives shared by the document stores and the config cache.

use serde_json::Value;

/// Applies `patch` onto `target` with JSON Merge Patch semantics (RFC 7386):
/// objects merge recursively, `null` removes a key, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                merge_patch(slot, value);
            }
        }
    }
}

/// Overlays a stored document on top of `defaults`. Unlike [`merge_patch`],
/// nulls in the stored document leave the default in place.
pub fn overlay(defaults: &mut Value, stored: &Value) {
    match (defaults, stored) {
        (Value::Object(base), Value::Object(top)) => {
            for (key, value) in top {
                if value.is_null() {
                    continue;
                }
                match base.get_mut(key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) if !value.is_null() => *slot = value.clone(),
        _ => {}
    }
}
