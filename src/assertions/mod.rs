//! Assertion Evaluator (§4.E): parses and evaluates one assertion per
//! line against a step's response.
//!
//! Grounded in the teacher's `executors::http::validate_assertions`
//! numeric-comparison style, rewritten against the spec's
//! `lhs op rhs | lhs exists | lhs !exists` grammar instead of the
//! teacher's `{type, operator, value, path}` struct grammar.

use crate::jsonpath;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lhs {
    Status,
    Duration,
    Body(String),
    Header(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Exists,
    NotExists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Number(f64),
    DurationMs(u64),
    Str(String),
    Bare(String),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub lhs: Lhs,
    pub op: Op,
    pub rhs: Rhs,
    pub raw: String,
}

pub struct AssertionResult {
    pub pass: bool,
    pub detail: String,
}

/// Parses one assertion line. Whitespace-separated: `lhs op rhs`, or
/// `lhs exists` / `lhs !exists` with no rhs.
pub fn parse_line(line: &str) -> Result<Assertion, String> {
    let raw = line.trim().to_string();
    if raw.is_empty() {
        return Err("empty assertion line".to_string());
    }

    let lhs_end = raw.find(char::is_whitespace).ok_or_else(|| {
        format!("assertion '{}' is missing an operator or 'exists'/'!exists'", raw)
    })?;
    let lhs_tok = &raw[..lhs_end];
    let rest = raw[lhs_end..].trim_start();

    let lhs = parse_lhs(lhs_tok)?;

    if rest == "exists" {
        return Ok(Assertion { lhs, op: Op::Exists, rhs: Rhs::None, raw });
    }
    if rest == "!exists" {
        return Ok(Assertion { lhs, op: Op::NotExists, rhs: Rhs::None, raw });
    }

    let op_end = rest
        .find(char::is_whitespace)
        .ok_or_else(|| format!("assertion '{}' is missing a right-hand side", raw))?;
    let op_tok = &rest[..op_end];
    let rhs_raw = rest[op_end..].trim();

    let op = parse_op(op_tok).ok_or_else(|| format!("unknown operator '{}'", op_tok))?;
    let rhs = parse_rhs(rhs_raw);

    Ok(Assertion { lhs, op, rhs, raw })
}

fn parse_lhs(tok: &str) -> Result<Lhs, String> {
    if tok == "status" {
        Ok(Lhs::Status)
    } else if tok == "duration" {
        Ok(Lhs::Duration)
    } else if tok == "body" || tok.starts_with("body.") {
        Ok(Lhs::Body(tok.to_string()))
    } else if let Some(name) = tok.strip_prefix("header.") {
        Ok(Lhs::Header(name.to_string()))
    } else {
        Err(format!("unrecognized left-hand side '{}'", tok))
    }
}

fn parse_op(tok: &str) -> Option<Op> {
    match tok {
        "==" => Some(Op::Eq),
        "!=" => Some(Op::Ne),
        ">" => Some(Op::Gt),
        ">=" => Some(Op::Ge),
        "<" => Some(Op::Lt),
        "<=" => Some(Op::Le),
        _ => None,
    }
}

fn parse_rhs(raw: &str) -> Rhs {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Rhs::Str(raw[1..raw.len() - 1].to_string());
    }
    if let Some(ms) = parse_duration_literal(raw) {
        return Rhs::DurationMs(ms);
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Rhs::Number(n);
    }
    Rhs::Bare(raw.to_string())
}

/// `500ms` / `1s` -> milliseconds. Anything else is not a duration literal.
fn parse_duration_literal(raw: &str) -> Option<u64> {
    if let Some(digits) = raw.strip_suffix("ms") {
        return digits.parse::<u64>().ok();
    }
    if let Some(digits) = raw.strip_suffix('s') {
        let secs: u64 = digits.parse().ok()?;
        return Some(secs * 1000);
    }
    None
}

/// Input to evaluation: the parts of a response an assertion can see.
/// Deliberately independent of the transport layer's `Response` type
/// so this module has no dependency on HTTP/gRPC specifics.
pub struct ResponseView<'a> {
    pub status: u16,
    pub duration_ms: u64,
    pub body: &'a serde_json::Value,
    pub headers: &'a HashMap<String, String>,
}

pub fn evaluate(assertion: &Assertion, response: &ResponseView) -> AssertionResult {
    match assertion.op {
        Op::Exists | Op::NotExists => evaluate_existence(assertion, response),
        _ => evaluate_comparison(assertion, response),
    }
}

fn evaluate_existence(assertion: &Assertion, response: &ResponseView) -> AssertionResult {
    let exists = match &assertion.lhs {
        Lhs::Status | Lhs::Duration => true,
        Lhs::Body(path) => jsonpath::resolve(response.body, path)
            .map(|v| !v.is_null())
            .unwrap_or(false),
        Lhs::Header(name) => lookup_header(response.headers, name).is_some(),
    };
    let pass = if assertion.op == Op::Exists { exists } else { !exists };
    AssertionResult {
        pass,
        detail: assertion.raw.clone(),
    }
}

fn evaluate_comparison(assertion: &Assertion, response: &ResponseView) -> AssertionResult {
    let pass = match &assertion.lhs {
        Lhs::Status => compare_number(response.status as f64, assertion.op, &assertion.rhs),
        Lhs::Duration => {
            let rhs_ms = match &assertion.rhs {
                Rhs::DurationMs(ms) => Some(*ms as f64),
                Rhs::Number(n) => Some(*n),
                _ => None,
            };
            rhs_ms
                .map(|ms| compare_ord(response.duration_ms as f64, assertion.op, ms))
                .unwrap_or(false)
        }
        Lhs::Body(path) => match jsonpath::resolve(response.body, path) {
            Some(value) => compare_value(value, assertion.op, &assertion.rhs),
            None => false,
        },
        Lhs::Header(name) => match lookup_header(response.headers, name) {
            Some(value) => compare_string(value, assertion.op, &assertion.rhs),
            None => false,
        },
    };
    AssertionResult {
        pass,
        detail: assertion.raw.clone(),
    }
}

fn lookup_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    let lower = name.to_lowercase();
    headers
        .iter()
        .find(|(k, _)| k.to_lowercase() == lower)
        .map(|(_, v)| v.as_str())
}

fn compare_number(lhs: f64, op: Op, rhs: &Rhs) -> bool {
    let rhs_n = match rhs {
        Rhs::Number(n) => *n,
        Rhs::DurationMs(ms) => *ms as f64,
        Rhs::Bare(s) | Rhs::Str(s) => match s.parse::<f64>() {
            Ok(n) => n,
            Err(_) => return false,
        },
        Rhs::None => return false,
    };
    compare_ord(lhs, op, rhs_n)
}

fn compare_ord(lhs: f64, op: Op, rhs: f64) -> bool {
    match op {
        Op::Eq => (lhs - rhs).abs() < f64::EPSILON,
        Op::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        Op::Gt => lhs > rhs,
        Op::Ge => lhs >= rhs,
        Op::Lt => lhs < rhs,
        Op::Le => lhs <= rhs,
        Op::Exists | Op::NotExists => false,
    }
}

fn compare_value(value: &serde_json::Value, op: Op, rhs: &Rhs) -> bool {
    match value {
        serde_json::Value::Number(n) => compare_number(n.as_f64().unwrap_or_default(), op, rhs),
        serde_json::Value::Bool(b) => {
            let rhs_str = rhs_as_str(rhs);
            match op {
                Op::Eq => rhs_str.as_deref() == Some(&b.to_string()),
                Op::Ne => rhs_str.as_deref() != Some(&b.to_string()),
                _ => false,
            }
        }
        serde_json::Value::String(s) => compare_string(s, op, rhs),
        other => {
            let s = jsonpath::stringify(other);
            compare_string(&s, op, rhs)
        }
    }
}

fn compare_string(lhs: &str, op: Op, rhs: &Rhs) -> bool {
    let rhs_str = match rhs_as_str(rhs) {
        Some(s) => s,
        None => return false,
    };
    match op {
        Op::Eq => lhs == rhs_str,
        Op::Ne => lhs != rhs_str,
        Op::Gt => lhs > rhs_str.as_str(),
        Op::Ge => lhs >= rhs_str.as_str(),
        Op::Lt => lhs < rhs_str.as_str(),
        Op::Le => lhs <= rhs_str.as_str(),
        Op::Exists | Op::NotExists => false,
    }
}

fn rhs_as_str(rhs: &Rhs) -> Option<String> {
    match rhs {
        Rhs::Str(s) | Rhs::Bare(s) => Some(s.clone()),
        Rhs::Number(n) => Some(n.to_string()),
        Rhs::DurationMs(ms) => Some(ms.to_string()),
        Rhs::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view<'a>(status: u16, duration_ms: u64, body: &'a serde_json::Value, headers: &'a HashMap<String, String>) -> ResponseView<'a> {
        ResponseView { status, duration_ms, body, headers }
    }

    #[test]
    fn parses_status_equality() {
        let a = parse_line("status == 200").unwrap();
        assert_eq!(a.lhs, Lhs::Status);
        assert_eq!(a.op, Op::Eq);
        assert_eq!(a.rhs, Rhs::Number(200.0));
    }

    #[test]
    fn parses_duration_literal_with_ms_suffix() {
        let a = parse_line("duration <= 500ms").unwrap();
        assert_eq!(a.rhs, Rhs::DurationMs(500));
    }

    #[test]
    fn parses_duration_literal_with_s_suffix() {
        let a = parse_line("duration < 1s").unwrap();
        assert_eq!(a.rhs, Rhs::DurationMs(1000));
    }

    #[test]
    fn parses_quoted_string_rhs() {
        let a = parse_line(r#"body.data.username == "admin""#).unwrap();
        assert_eq!(a.rhs, Rhs::Str("admin".to_string()));
    }

    #[test]
    fn parses_exists_and_not_exists() {
        assert_eq!(parse_line("body.data.token exists").unwrap().op, Op::Exists);
        assert_eq!(parse_line("body.data.token !exists").unwrap().op, Op::NotExists);
    }

    #[test]
    fn parses_header_lhs() {
        let a = parse_line("header.Content-Type == \"application/json\"").unwrap();
        assert_eq!(a.lhs, Lhs::Header("Content-Type".to_string()));
    }

    #[test]
    fn status_equality_passes() {
        let body = json!({});
        let headers = HashMap::new();
        let a = parse_line("status == 200").unwrap();
        let result = evaluate(&a, &view(200, 10, &body, &headers));
        assert!(result.pass);
    }

    #[test]
    fn status_equality_fails_on_mismatch() {
        let body = json!({});
        let headers = HashMap::new();
        let a = parse_line("status == 200").unwrap();
        let result = evaluate(&a, &view(404, 10, &body, &headers));
        assert!(!result.pass);
    }

    #[test]
    fn body_path_equality_matches_string() {
        let body = json!({"data": {"username": "admin"}});
        let headers = HashMap::new();
        let a = parse_line(r#"body.data.username == "admin""#).unwrap();
        assert!(evaluate(&a, &view(200, 0, &body, &headers)).pass);
    }

    #[test]
    fn body_array_index_resolves() {
        let body = json!({"items": [{"id": 7}]});
        let headers = HashMap::new();
        let a = parse_line("body.items.0.id == 7").unwrap();
        assert!(evaluate(&a, &view(200, 0, &body, &headers)).pass);
    }

    #[test]
    fn not_exists_passes_on_missing_path() {
        let body = json!({"data": {}});
        let headers = HashMap::new();
        let a = parse_line("body.data.token !exists").unwrap();
        assert!(evaluate(&a, &view(200, 0, &body, &headers)).pass);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let body = json!({});
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let a = parse_line(r#"header.Content-Type == "application/json""#).unwrap();
        assert!(evaluate(&a, &view(200, 0, &body, &headers)).pass);
    }

    #[test]
    fn duration_assertion_compares_milliseconds() {
        let body = json!({});
        let headers = HashMap::new();
        let a = parse_line("duration <= 500ms").unwrap();
        assert!(evaluate(&a, &view(200, 300, &body, &headers)).pass);
        assert!(!evaluate(&a, &view(200, 600, &body, &headers)).pass);
    }

    #[test]
    fn rejects_malformed_assertion_line() {
        assert!(parse_line("status").is_err());
        assert!(parse_line("bogus == 1").is_err());
    }
}
