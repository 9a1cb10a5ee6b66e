//! Dotted-path navigation into decoded JSON bodies.
//!
//! Shared by the assertion evaluator (`body.x.y` on the left-hand
//! side of an assert) and the capture engine (`data.access_token` on
//! the right-hand side of a capture). A leading `body.` or `$.`
//! prefix is optional and stripped if present — callers may pass
//! either `data.token` or `body.data.token`.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Splits `a.b.0.c` into `[Key("a"), Key("b"), Index(0), Key("c")]`.
///
/// A leading `body` root is only stripped when it's the whole first
/// segment (`body` or `body.`), not merely a prefix of it — a field
/// actually named `bodyWeight` must survive untouched.
pub fn split_path(path: &str) -> Vec<Segment> {
    let without_dollar = path.strip_prefix("$.").unwrap_or(path);
    let without_body = if without_dollar == "body" {
        ""
    } else if let Some(rest) = without_dollar.strip_prefix("body.") {
        rest
    } else {
        without_dollar
    };
    without_body
        .trim_start_matches('.')
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(n) => Segment::Index(n),
            Err(_) => Segment::Key(s.to_string()),
        })
        .collect()
}

/// Walks `value` following `segments`. Returns `None` as soon as a
/// segment can't be resolved instead of erroring — a non-terminal
/// miss means "this path does not exist", which callers turn into
/// either an `!exists` pass or a capture/assertion failure.
pub fn navigate<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolves a raw dotted-path string against `value`.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    navigate(value, &split_path(path))
}

/// Renders a JSON value the way a captured variable or an assertion
/// comparison would stringify it: primitives in their plain textual
/// form, objects/arrays as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
