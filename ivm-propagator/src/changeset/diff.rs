use std::collections::BTreeSet;

use serde_json::Value;

/// Structural diff between two JSON trees, returned as the set of changed
/// `/`-separated paths. Completeness over minimality: every leaf that
/// actually differs appears; no attempt at edit-distance optimality.
pub fn changed_paths(from: &Value, to: &Value) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    walk(from, to, "", &mut paths);
    paths
}

/// Every leaf path present in a single tree; used for CREATE and DELETE
/// where the other side is absent.
pub fn all_paths(value: &Value) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect(value, "", &mut paths);
    paths
}

fn walk(from: &Value, to: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, from_val) in a {
                let path = join(prefix, key);
                match b.get(key) {
                    Some(to_val) => walk(from_val, to_val, &path, out),
                    None => collect(from_val, &path, out),
                }
            }
            for (key, to_val) in b {
                if !a.contains_key(key) {
                    collect(to_val, &join(prefix, key), out);
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            // Positional comparison; a length change also marks the array
            // itself so subtree-level rules fire.
            if a.len() != b.len() {
                out.insert(leaf(prefix));
            }
            for (i, (from_val, to_val)) in a.iter().zip(b.iter()).enumerate() {
                walk(from_val, to_val, &join(prefix, &i.to_string()), out);
            }
            if a.len() > b.len() {
                for (i, v) in a.iter().enumerate().skip(b.len()) {
                    collect(v, &join(prefix, &i.to_string()), out);
                }
            } else {
                for (i, v) in b.iter().enumerate().skip(a.len()) {
                    collect(v, &join(prefix, &i.to_string()), out);
                }
            }
        }
        (a, b) => {
            if a != b {
                out.insert(leaf(prefix));
            }
        }
    }
}

fn collect(value: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, val) in map {
                collect(val, &join(prefix, key), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, val) in items.iter().enumerate() {
                collect(val, &join(prefix, &i.to_string()), out);
            }
        }
        _ => {
            out.insert(leaf(prefix));
        }
    }
}

fn join(prefix: &str, segment: &str) -> String {
    format!("{}/{}", prefix, segment)
}

fn leaf(prefix: &str) -> String {
    if prefix.is_empty() {
        "/".to_string()
    } else {
        prefix.to_string()
    }
}
