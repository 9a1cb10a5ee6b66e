//! Capture Engine (§4.F): pulls named values out of a response body
//! into the variable store.
//!
//! Grounded in the teacher's `extractors::Extractor::process`, trimmed
//! down to the spec's grammar — body-path only, no header/status_code
//! sources and no regex extraction (neither has a spec counterpart).

use crate::jsonpath;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Variable name the resolved value is stored under.
    pub name: String,
    /// Dotted path into the response body, e.g. `data.access_token`.
    pub path: String,
}

pub struct CaptureOutcome {
    pub name: String,
    pub path: String,
    pub value: Option<String>,
}

impl CaptureOutcome {
    pub fn found(&self) -> bool {
        self.value.is_some()
    }
}

/// Resolves every capture against `body`, in declaration order. A
/// capture whose path doesn't resolve yields a `None` value rather
/// than aborting the batch — callers decide whether a missing capture
/// is fatal (it is, per §4.F, unless the step's `onFail` is `continue`).
pub fn run(captures: &[Capture], body: &Value) -> Vec<CaptureOutcome> {
    captures
        .iter()
        .map(|c| {
            let value = jsonpath::resolve(body, &c.path).map(jsonpath::stringify);
            CaptureOutcome {
                name: c.name.clone(),
                path: c.path.clone(),
                value,
            }
        })
        .collect()
}

/// Applies every successfully-resolved outcome to `vars`, returning the
/// names that failed to resolve so the caller can decide what to do
/// with them.
pub fn apply(outcomes: &[CaptureOutcome], vars: &mut HashMap<String, String>) -> Vec<String> {
    let mut missing = Vec::new();
    for outcome in outcomes {
        match &outcome.value {
            Some(v) => {
                vars.insert(outcome.name.clone(), v.clone());
            }
            None => missing.push(outcome.name.clone()),
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn captures_scalar_value_as_string() {
        let body = json!({"data": {"token": "abc123"}});
        let outcomes = run(
            &[Capture {
                name: "auth_token".to_string(),
                path: "data.token".to_string(),
            }],
            &body,
        );
        assert_eq!(outcomes[0].value.as_deref(), Some("abc123"));
    }

    #[test]
    fn captures_number_as_string() {
        let body = json!({"data": {"id": 42}});
        let outcomes = run(
            &[Capture {
                name: "id".to_string(),
                path: "data.id".to_string(),
            }],
            &body,
        );
        assert_eq!(outcomes[0].value.as_deref(), Some("42"));
    }

    #[test]
    fn missing_path_yields_none_not_error() {
        let body = json!({"data": {}});
        let outcomes = run(
            &[Capture {
                name: "token".to_string(),
                path: "data.missing".to_string(),
            }],
            &body,
        );
        assert!(!outcomes[0].found());
    }

    #[test]
    fn apply_populates_map_and_reports_missing() {
        let body = json!({"data": {"token": "abc"}});
        let outcomes = run(
            &[
                Capture { name: "token".to_string(), path: "data.token".to_string() },
                Capture { name: "missing".to_string(), path: "data.nope".to_string() },
            ],
            &body,
        );
        let mut vars = HashMap::new();
        let missing = apply(&outcomes, &mut vars);
        assert_eq!(vars.get("token"), Some(&"abc".to_string()));
        assert_eq!(missing, vec!["missing".to_string()]);
    }

    #[test]
    fn multiple_captures_preserve_declaration_order() {
        let body = json!({"a": 1, "b": 2});
        let outcomes = run(
            &[
                Capture { name: "first".to_string(), path: "a".to_string() },
                Capture { name: "second".to_string(), path: "b".to_string() },
            ],
            &body,
        );
        assert_eq!(outcomes[0].name, "first");
        assert_eq!(outcomes[1].name, "second");
    }
}
