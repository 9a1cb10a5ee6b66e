//! Variable Store: holds captured values and performs `{{…}}` interpolation.
//!
//! Grammar: `{{ ident [ | default:"literal" ] }}`, where `ident` may
//! contain `$` (built-ins) and `.` (treated as part of the name, not
//! traversed — `{{a.b}}` looks up the literal key `"a.b"`, it does not
//! walk into a nested value).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{\s*([A-Za-z0-9_.$-]+)\s*(?:\|\s*default:\s*"([^"]*)")?\s*\}\}"#)
        .expect("placeholder regex is valid")
});

/// Ordered `name -> value` store. Order is insertion order, which
/// matters for `--debug-vars` output but not for resolution.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: HashMap<String, String>,
    order: Vec<String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value.into());
    }

    pub fn extend(&mut self, other: &HashMap<String, String>) {
        for (k, v) in other {
            self.set(k.clone(), v.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    /// Iterates in insertion order, for `--debug-vars`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |k| (k.as_str(), self.values[k].as_str()))
    }

    /// Best-effort interpolation: unresolved placeholders without a
    /// default are left verbatim in the output.
    pub fn interpolate(&self, text: &str) -> String {
        self.interpolate_with_warnings(text).0
    }

    /// Same as `interpolate`, but also returns the names of any
    /// placeholders that had neither a stored value nor a default.
    pub fn interpolate_with_warnings(&self, text: &str) -> (String, Vec<String>) {
        let mut missing = Vec::new();
        let out = PLACEHOLDER
            .replace_all(text, |caps: &regex::Captures| {
                let ident = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());
                match self.resolve(ident) {
                    Some(v) => v,
                    None => match default {
                        Some(d) => d.to_string(),
                        None => {
                            missing.push(ident.to_string());
                            caps[0].to_string()
                        }
                    },
                }
            })
            .into_owned();
        (out, missing)
    }

    /// Strict interpolation: the first unresolved placeholder without a
    /// default aborts the whole substitution.
    pub fn interpolate_strict(&self, text: &str) -> Result<String, String> {
        let mut err = None;
        let out = PLACEHOLDER
            .replace_all(text, |caps: &regex::Captures| {
                if err.is_some() {
                    return String::new();
                }
                let ident = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());
                match self.resolve(ident) {
                    Some(v) => v,
                    None => match default {
                        Some(d) => d.to_string(),
                        None => {
                            err = Some(ident.to_string());
                            String::new()
                        }
                    },
                }
            })
            .into_owned();
        match err {
            Some(name) => Err(name),
            None => Ok(out),
        }
    }

    /// Resolves a single identifier: built-ins first, then the store.
    /// Built-ins are never persisted — every call gets a fresh value.
    fn resolve(&self, ident: &str) -> Option<String> {
        match ident {
            "$timestamp" => Some(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
                    .to_string(),
            ),
            "$randomInt" => Some((rand::random::<u32>() % 10_000).to_string()),
            _ => self.get(ident).map(|s| s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_known_variable() {
        let mut store = VariableStore::new();
        store.set("token", "T");
        assert_eq!(store.interpolate("Bearer {{token}}"), "Bearer T");
    }

    #[test]
    fn leaves_unknown_variable_verbatim_without_default() {
        let store = VariableStore::new();
        assert_eq!(store.interpolate("{{missing}}"), "{{missing}}");
    }

    #[test]
    fn falls_back_to_default_literal() {
        let store = VariableStore::new();
        assert_eq!(
            store.interpolate(r#"{{missing | default:"fallback"}}"#),
            "fallback"
        );
    }

    #[test]
    fn strict_mode_errors_on_missing_variable() {
        let store = VariableStore::new();
        assert_eq!(store.interpolate_strict("{{missing}}"), Err("missing".to_string()));
    }

    #[test]
    fn strict_mode_resolves_present_variable() {
        let mut store = VariableStore::new();
        store.set("id", "42");
        assert_eq!(store.interpolate_strict("/users/{{id}}"), Ok("/users/42".to_string()));
    }

    #[test]
    fn warnings_collect_all_missing_names() {
        let store = VariableStore::new();
        let (text, missing) = store.interpolate_with_warnings("{{a}} and {{b}}");
        assert_eq!(text, "{{a}} and {{b}}");
        assert_eq!(missing, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn timestamp_builtin_is_numeric_and_not_stored() {
        let store = VariableStore::new();
        let out = store.interpolate("{{$timestamp}}");
        assert!(out.chars().all(|c| c.is_ascii_digit()));
        assert!(store.get("$timestamp").is_none());
    }

    #[test]
    fn random_int_builtin_is_bounded() {
        let store = VariableStore::new();
        let out = store.interpolate("{{$randomInt}}");
        let n: u32 = out.parse().expect("randomInt must be numeric");
        assert!(n < 10_000);
    }

    #[test]
    fn interpolation_is_idempotent_once_resolved() {
        let mut store = VariableStore::new();
        store.set("name", "admin");
        let once = store.interpolate("hello {{name}}");
        let twice = store.interpolate(&once);
        assert_eq!(once, twice);
    }
}
