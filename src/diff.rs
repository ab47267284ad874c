// src/diff.rs

//! Structural diff and patch for JSON records
//!
//! `diff(a, b)` produces a [`Patch`] such that `apply_patch(a, &patch)`
//! yields `b`. Objects are diffed field by field and recursively; any other
//! change replaces the value wholesale. Keys beginning with `_` are internal
//! (`_id`, `__ver`, `__pkg`, `_previous`) and never appear in a patch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Marker key for executable field values (`{"$fn": "<source>"}`)
pub const FUNCTION_KEY: &str = "$fn";

/// A structural change set between two JSON values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    /// Replace the whole value
    Replace { value: Value },
    /// Change individual object fields
    Fields { changes: BTreeMap<String, FieldChange> },
}

/// Change to a single object field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldChange {
    Set { value: Value },
    Remove,
    Nested { patch: Patch },
}

/// Whether a field is internal bookkeeping and excluded from diffs
pub fn is_internal(key: &str) -> bool {
    key.starts_with('_')
}

/// Compute the patch turning `a` into `b`, or `None` if they are equal
pub fn diff(a: &Value, b: &Value) -> Option<Patch> {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => diff_objects(left, right),
        _ if a == b => None,
        _ => Some(Patch::Replace { value: b.clone() }),
    }
}

fn diff_objects(left: &Map<String, Value>, right: &Map<String, Value>) -> Option<Patch> {
    let keys: BTreeSet<&String> = left
        .keys()
        .chain(right.keys())
        .filter(|k| !is_internal(k))
        .collect();

    let mut changes = BTreeMap::new();
    for key in keys {
        let change = match (left.get(key), right.get(key)) {
            (Some(_), None) => FieldChange::Remove,
            (None, Some(value)) => FieldChange::Set {
                value: value.clone(),
            },
            (Some(old), Some(new)) => match diff(old, new) {
                None => continue,
                Some(Patch::Replace { value }) => FieldChange::Set { value },
                Some(patch) => FieldChange::Nested { patch },
            },
            (None, None) => continue,
        };
        changes.insert(key.clone(), change);
    }

    if changes.is_empty() {
        None
    } else {
        Some(Patch::Fields { changes })
    }
}

/// Apply a patch produced by [`diff`]
pub fn apply_patch(value: &Value, patch: &Patch) -> Value {
    match patch {
        Patch::Replace { value } => value.clone(),
        Patch::Fields { changes } => {
            let mut map = match value {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (key, change) in changes {
                match change {
                    FieldChange::Set { value } => {
                        map.insert(key.clone(), value.clone());
                    }
                    FieldChange::Remove => {
                        map.remove(key);
                    }
                    FieldChange::Nested { patch } => {
                        let current = map.get(key).cloned().unwrap_or(Value::Null);
                        map.insert(key.clone(), apply_patch(&current, patch));
                    }
                }
            }
            Value::Object(map)
        }
    }
}

/// Replace executable values with their source text before diffing
///
/// Any `{"$fn": "<source>"}` object becomes the plain `"<source>"` string.
/// Top-level fields named in `function_fields` that still hold a
/// non-string value are serialized to their JSON text.
pub fn normalize_executable(value: &Value, function_fields: &[String]) -> Value {
    let mut normalized = strip_functions(value);
    if let Value::Object(map) = &mut normalized {
        for field in function_fields {
            if let Some(v) = map.get_mut(field) {
                if !v.is_string() && !v.is_null() {
                    *v = Value::String(v.to_string());
                }
            }
        }
    }
    normalized
}

fn strip_functions(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(source)) = map.get(FUNCTION_KEY) {
                    return Value::String(source.clone());
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), strip_functions(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_functions).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_values_have_no_patch() {
        let a = json!({"name": "widget", "size": 3});
        assert_eq!(diff(&a, &a.clone()), None);
    }

    #[test]
    fn test_field_changes_roundtrip() {
        let a = json!({"name": "widget", "size": 3, "tags": ["a"], "gone": true});
        let b = json!({"name": "gadget", "size": 3, "tags": ["a", "b"], "new": 1});

        let patch = diff(&a, &b).unwrap();
        let Patch::Fields { changes } = &patch else {
            panic!("expected field patch");
        };
        assert_eq!(changes.len(), 4);
        assert_eq!(changes["gone"], FieldChange::Remove);
        assert_eq!(apply_patch(&a, &patch), b);
    }

    #[test]
    fn test_nested_objects_are_diffed_recursively() {
        let a = json!({"layout": {"cols": 2, "rows": 4}});
        let b = json!({"layout": {"cols": 3, "rows": 4}});

        let patch = diff(&a, &b).unwrap();
        let Patch::Fields { changes } = &patch else {
            panic!("expected field patch");
        };
        assert!(matches!(changes["layout"], FieldChange::Nested { .. }));
        assert_eq!(apply_patch(&a, &patch), b);
    }

    #[test]
    fn test_internal_fields_are_ignored() {
        let a = json!({"_id": "x", "__ver": "1", "_previous": {"n": 1}, "n": 2});
        let b = json!({"_id": "x", "__ver": "2", "n": 2});
        assert_eq!(diff(&a, &b), None);

        let applied = apply_patch(&a, &diff(&a, &json!({"_id": "x", "n": 5})).unwrap());
        assert_eq!(applied["__ver"], json!("1"));
        assert_eq!(applied["n"], json!(5));
    }

    #[test]
    fn test_scalar_replacement() {
        let patch = diff(&json!(1), &json!("one")).unwrap();
        assert_eq!(patch, Patch::Replace { value: json!("one") });
    }

    #[test]
    fn test_patch_serializes_as_tagged_json() {
        let patch = diff(&json!({"a": 1}), &json!({})).unwrap();
        let encoded = serde_json::to_value(&patch).unwrap();
        assert_eq!(encoded, json!({"op": "fields", "changes": {"a": {"op": "remove"}}}));
        let decoded: Patch = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, patch);
    }

    #[test]
    fn test_normalize_executable() {
        let record = json!({
            "onSave": {"$fn": "function () { return 1; }"},
            "handlers": [{"$fn": "x => x"}],
            "compute": {"body": "a + b"},
            "plain": {"$fn": "not-alone", "other": 1}
        });
        let normalized = normalize_executable(&record, &["compute".to_string()]);

        assert_eq!(normalized["onSave"], json!("function () { return 1; }"));
        assert_eq!(normalized["handlers"], json!(["x => x"]));
        assert_eq!(normalized["compute"], json!("{\"body\":\"a + b\"}"));
        assert_eq!(normalized["plain"]["other"], json!(1));
    }
}
