//! Configuration tree primitives: dotted-path access, deep merge and leaf diff.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};

/// An ordered configuration tree.
///
/// Insertion order is preserved (`serde_json` is built with
/// `preserve_order`), so merged trees keep the order in which keys first
/// appeared across sources.
pub type ConfigObject = Map<String, Value>;

/// One changed leaf of the configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    /// Full dotted key of the leaf.
    pub key: String,
    /// Value after the change, `None` if the leaf was removed.
    pub new: Option<Value>,
    /// Value before the change, `None` if the leaf did not exist.
    pub old: Option<Value>,
}

/// Splits a dotted key into its segments, rejecting empty segments.
pub fn split_key(key: &str) -> ConfigResult<Vec<&str>> {
    if key.is_empty() {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    Ok(segments)
}

/// Returns the JSON type name of `value`, used in error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Looks up a dotted key. Numeric segments index into arrays.
pub fn get_path<'a>(root: &'a ConfigObject, key: &str) -> Option<&'a Value> {
    let segments = split_key(key).ok()?;
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(*first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn ensure_object(value: &mut Value) -> &mut ConfigObject {
    if !value.is_object() {
        *value = Value::Object(ConfigObject::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

/// Writes `value` at a dotted key, creating intermediate objects.
///
/// A non-object value in the way is replaced by an object. Returns the
/// previous value at `key`.
pub fn set_path(root: &mut ConfigObject, key: &str, value: Value) -> ConfigResult<Option<Value>> {
    let segments = split_key(key)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;

    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(ConfigObject::new()));
        current = ensure_object(slot);
    }
    Ok(current.insert(last.to_string(), value))
}

/// Removes a dotted key, returning the removed value.
pub fn remove_path(root: &mut ConfigObject, key: &str) -> ConfigResult<Option<Value>> {
    let segments = split_key(key)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;

    let mut current = root;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(Value::Object(map)) => current = map,
            _ => return Ok(None),
        }
    }
    Ok(current.shift_remove(*last))
}

/// Deep-merges `overlay` into `base`.
///
/// Nested objects merge recursively; every other value in `overlay`
/// (scalars, arrays, null) replaces the value in `base` wholesale.
pub fn deep_merge(base: &mut ConfigObject, overlay: ConfigObject) {
    for (key, value) in overlay {
        match value {
            Value::Object(incoming) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => deep_merge(existing, incoming),
                _ => {
                    base.insert(key, Value::Object(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// Deep-merges a sequence of trees, later entries taking precedence.
pub fn merge_all<I>(layers: I) -> ConfigObject
where
    I: IntoIterator<Item = ConfigObject>,
{
    let mut merged = ConfigObject::new();
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    merged
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn as_branch(value: Option<&Value>) -> Option<&ConfigObject> {
    match value {
        Some(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

fn collect_leaves(prefix: &str, value: &Value, removed: bool, out: &mut Vec<ConfigChange>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(&join(prefix, key), child, removed, out);
            }
        }
        leaf => out.push(ConfigChange {
            key: prefix.to_string(),
            new: (!removed).then(|| leaf.clone()),
            old: removed.then(|| leaf.clone()),
        }),
    }
}

/// Appends one [`ConfigChange`] per leaf that differs between `old` and `new`.
///
/// Non-empty objects are branches; everything else (including `{}`) is a
/// leaf. When a branch replaces a leaf (or the reverse), the vanished leaves
/// are reported as removals and the new leaves as additions.
pub fn diff_values(prefix: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<ConfigChange>) {
    match (as_branch(old), as_branch(new)) {
        (Some(old_map), Some(new_map)) => {
            for (key, old_child) in old_map {
                diff_values(&join(prefix, key), Some(old_child), new_map.get(key), out);
            }
            for (key, new_child) in new_map {
                if !old_map.contains_key(key) {
                    diff_values(&join(prefix, key), None, Some(new_child), out);
                }
            }
        }
        (Some(_), None) => {
            if let Some(old_value) = old {
                collect_leaves(prefix, old_value, true, out);
            }
            if let Some(new_value) = new {
                out.push(ConfigChange {
                    key: prefix.to_string(),
                    new: Some(new_value.clone()),
                    old: None,
                });
            }
        }
        (None, Some(_)) => {
            if let Some(old_value) = old {
                out.push(ConfigChange {
                    key: prefix.to_string(),
                    new: None,
                    old: Some(old_value.clone()),
                });
            }
            if let Some(new_value) = new {
                collect_leaves(prefix, new_value, false, out);
            }
        }
        (None, None) => {
            if old != new {
                out.push(ConfigChange {
                    key: prefix.to_string(),
                    new: new.cloned(),
                    old: old.cloned(),
                });
            }
        }
    }
}

/// Diffs two whole trees.
pub fn diff_trees(old: &ConfigObject, new: &ConfigObject) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    for (key, old_child) in old {
        diff_values(key, Some(old_child), new.get(key), &mut changes);
    }
    for (key, new_child) in new {
        if !old.contains_key(key) {
            diff_values(key, None, Some(new_child), &mut changes);
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> ConfigObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut base = obj(json!({"server": {"host": "localhost", "port": 80}, "debug": false}));
        deep_merge(
            &mut base,
            obj(json!({"server": {"port": 8080}, "debug": true})),
        );
        assert_eq!(
            Value::Object(base),
            json!({"server": {"host": "localhost", "port": 8080}, "debug": true})
        );
    }

    #[test]
    fn test_deep_merge_replaces_arrays_wholesale() {
        let mut base = obj(json!({"plugins": ["a", "b", "c"]}));
        deep_merge(&mut base, obj(json!({"plugins": ["d"]})));
        assert_eq!(Value::Object(base), json!({"plugins": ["d"]}));
    }

    #[test]
    fn test_get_path_walks_objects_and_arrays() {
        let root = obj(json!({"a": {"b": [10, {"c": "deep"}]}}));
        assert_eq!(get_path(&root, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&root, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(get_path(&root, "a.x"), None);
        assert_eq!(get_path(&root, "a..b"), None);
    }

    #[test]
    fn test_set_path_creates_and_replaces_intermediates() {
        let mut root = obj(json!({"a": 1}));
        let old = set_path(&mut root, "a.b.c", json!(true)).unwrap();
        assert_eq!(old, None);
        assert_eq!(Value::Object(root), json!({"a": {"b": {"c": true}}}));
    }

    #[test]
    fn test_set_path_rejects_empty_key() {
        let mut root = ConfigObject::new();
        assert!(matches!(
            set_path(&mut root, "", json!(1)),
            Err(ConfigError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_remove_path() {
        let mut root = obj(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove_path(&mut root, "a.b").unwrap(), Some(json!(1)));
        assert_eq!(remove_path(&mut root, "a.zz.q").unwrap(), None);
        assert_eq!(Value::Object(root), json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_diff_reports_changed_leaves_only() {
        let old = obj(json!({"a": 1, "b": {"c": 2, "d": 3}}));
        let new = obj(json!({"a": 1, "b": {"c": 20, "d": 3}, "e": "x"}));
        let changes = diff_trees(&old, &new);
        assert_eq!(
            changes,
            vec![
                ConfigChange {
                    key: "b.c".into(),
                    new: Some(json!(20)),
                    old: Some(json!(2))
                },
                ConfigChange {
                    key: "e".into(),
                    new: Some(json!("x")),
                    old: None
                },
            ]
        );
    }

    #[test]
    fn test_diff_branch_replaced_by_scalar() {
        let old = obj(json!({"a": {"b": 1}}));
        let new = obj(json!({"a": 5}));
        let keys: Vec<_> = diff_trees(&old, &new)
            .into_iter()
            .map(|c| (c.key, c.old, c.new))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a.b".to_string(), Some(json!(1)), None),
                ("a".to_string(), None, Some(json!(5))),
            ]
        );
    }

    #[test]
    fn test_diff_from_empty_tree() {
        let changes = diff_trees(&ConfigObject::new(), &obj(json!({"a": {"b": 1}})));
        assert_eq!(
            changes,
            vec![ConfigChange {
                key: "a.b".into(),
                new: Some(json!(1)),
                old: None
            }]
        );
    }
}
