//! Walks kernel output for embedded `success: false` markers.
//!
//! The test-checker component nests its verdicts anywhere inside the result
//! document, so the walk visits every object and array, tracking a `$`-rooted
//! path expression per node, and aggregates every failing path into a single
//! error message.

use std::collections::VecDeque;

use serde_json::Value;

/// Accept the output iff no nested object carries `"success": false`.
pub fn ensure_success(output: &Value) -> Result<(), String> {
    let failures = collect_failures(output);
    if failures.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "test checker reported failures at {}",
            failures.join(", ")
        ))
    }
}

fn collect_failures(output: &Value) -> Vec<String> {
    // serde_json::Value is a tree, so the walk cannot cycle.
    let mut failures = Vec::new();
    let mut queue: VecDeque<(String, &Value)> = VecDeque::new();
    queue.push_back(("$".to_string(), output));

    while let Some((path, value)) = queue.pop_front() {
        match value {
            Value::Object(map) => {
                if let Some(Value::Bool(false)) = map.get("success") {
                    failures.push(format_failure(&path, map.get("messages")));
                }
                for (key, child) in map {
                    if child.is_object() || child.is_array() {
                        queue.push_back((format!("{path}.{key}"), child));
                    }
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    if child.is_object() || child.is_array() {
                        queue.push_back((format!("{path}[{index}]"), child));
                    }
                }
            }
            _ => {}
        }
    }
    failures
}

fn format_failure(path: &str, messages: Option<&Value>) -> String {
    let joined = messages
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();
    if joined.is_empty() {
        path.to_string()
    } else {
        format!("{path} => {joined}")
    }
}
