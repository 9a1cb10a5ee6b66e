//! Request Block Parser (§4.C): turns a step's raw text into a typed
//! [`RequestOptions`], plus the `.kest` legacy formats that reuse the
//! same grammar.
//!
//! Grounded in the teacher's `executors::http` request-assembly shape
//! (method/url/headers/body as separate fields assembled before
//! send), but the parsing itself — lines to a typed struct — has no
//! teacher counterpart since the teacher reads a pre-structured JSON
//! `Step`, not free text.

use crate::assertions::{self, Assertion};
use crate::captures::Capture;
use crate::document::RequestOptions;
use crate::errors::RunnerError;

const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS",
];

/// Parses a step block's body (§4.C grammar: `METHOD URL`, headers,
/// body, bracketed `[Captures]`/`[Asserts]`/`[Query]`/`[Options]`
/// sections in any order) into a [`RequestOptions`].
pub fn parse_request_block(text: &str, step_id: &str) -> Result<RequestOptions, RunnerError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;

    while i < lines.len() && lines[i].trim().is_empty() {
        i += 1;
    }
    if i >= lines.len() {
        return Err(RunnerError::MissingMethodUrl {
            step_id: step_id.to_string(),
        });
    }

    let (method, url) = parse_method_line(lines[i], step_id)?;
    i += 1;

    let mut headers = Vec::new();
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if trimmed.is_empty() || is_section_header(trimmed) {
            break;
        }
        if let Some((name, value)) = split_header_line(trimmed) {
            headers.push((name, value));
            i += 1;
        } else {
            break;
        }
    }

    while i < lines.len() && lines[i].trim().is_empty() {
        i += 1;
    }

    let mut body_lines = Vec::new();
    while i < lines.len() && !is_section_header(lines[i].trim()) {
        body_lines.push(lines[i]);
        i += 1;
    }
    let body = {
        while body_lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
            body_lines.pop();
        }
        if body_lines.is_empty() {
            None
        } else {
            Some(body_lines.join("\n"))
        }
    };

    let mut request = RequestOptions {
        method,
        url,
        headers,
        queries: Vec::new(),
        body,
        captures: Vec::new(),
        asserts: Vec::new(),
        verbose: false,
        no_record: false,
        max_duration_ms: None,
        retry: 0,
        retry_wait_ms: 1000,
        stream: false,
    };

    while i < lines.len() {
        let header = lines[i].trim();
        if !is_section_header(header) {
            i += 1;
            continue;
        }
        let section = header[1..header.len() - 1].to_ascii_lowercase();
        i += 1;
        let mut section_lines = Vec::new();
        while i < lines.len() && !is_section_header(lines[i].trim()) {
            section_lines.push(lines[i]);
            i += 1;
        }
        apply_section(&section, &section_lines, &mut request, step_id)?;
    }

    Ok(request)
}

fn is_section_header(trimmed: &str) -> bool {
    trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() > 2
}

fn parse_method_line(line: &str, step_id: &str) -> Result<(String, String), RunnerError> {
    let trimmed = line.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let method = parts.next().unwrap_or("");
    let url = parts.next().map(str::trim).unwrap_or("");
    if method.is_empty() || url.is_empty() {
        return Err(RunnerError::MissingMethodUrl {
            step_id: step_id.to_string(),
        });
    }
    let upper = method.to_ascii_uppercase();
    if !METHODS.contains(&upper.as_str()) {
        return Err(RunnerError::InvalidHttpMethod {
            step_id: step_id.to_string(),
            method: method.to_string(),
        });
    }
    Ok((upper, url.to_string()))
}

fn split_header_line(line: &str) -> Option<(String, String)> {
    let idx = line.find(':')?;
    let name = line[..idx].trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    let value = line[idx + 1..].trim();
    Some((name.to_string(), value.to_string()))
}

fn apply_section(
    section: &str,
    lines: &[&str],
    request: &mut RequestOptions,
    step_id: &str,
) -> Result<(), RunnerError> {
    match section {
        "captures" => {
            for line in lines {
                if let Some((name, path)) = split_capture_line(line) {
                    request.captures.push(Capture { name, path });
                }
            }
        }
        "asserts" => {
            for line in lines {
                if line.trim().is_empty() {
                    continue;
                }
                let assertion: Assertion = assertions::parse_line(line).map_err(|_| {
                    RunnerError::MalformedDirective {
                        line: 0,
                        text: format!("step '{}': bad assertion '{}'", step_id, line.trim()),
                    }
                })?;
                request.asserts.push(assertion);
            }
        }
        "query" => {
            for line in lines {
                if let Some((k, v)) = split_kv_equals(line) {
                    request.queries.push((k, v));
                }
            }
        }
        "options" => {
            for line in lines {
                if let Some((k, v)) = split_kv_equals(line) {
                    apply_option(request, &k, &v);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn split_capture_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(idx) = trimmed.find(':') {
        let name = trimmed[..idx].trim();
        let path = trimmed[idx + 1..].trim();
        if !name.is_empty() && !path.is_empty() {
            return Some((name.to_string(), path.to_string()));
        }
    }
    split_kv_equals(trimmed)
}

fn split_kv_equals(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    let idx = trimmed.find('=')?;
    let key = trimmed[..idx].trim();
    let value = trimmed[idx + 1..].trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn apply_option(request: &mut RequestOptions, key: &str, value: &str) {
    match key {
        "retry" => request.retry = value.parse().unwrap_or(request.retry),
        "retry-wait" => request.retry_wait_ms = value.parse().unwrap_or(request.retry_wait_ms),
        "max-duration" => request.max_duration_ms = value.parse().ok(),
        "stream" => request.stream = value.eq_ignore_ascii_case("true"),
        "no-record" => request.no_record = value.eq_ignore_ascii_case("true"),
        _ => {}
    }
}

/// Parses the legacy `.kest` single-line form:
/// `METHOD URL --data JSON --header "K: V" --capture "name: path"
/// --assert "expr" --retry N --retry-wait MS --max-duration MS --no-record`
pub fn parse_legacy_line(line: &str, step_id: &str) -> Result<RequestOptions, RunnerError> {
    let tokens = shell_split(line);
    if tokens.len() < 2 {
        return Err(RunnerError::MissingMethodUrl {
            step_id: step_id.to_string(),
        });
    }

    let method = tokens[0].to_ascii_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(RunnerError::InvalidHttpMethod {
            step_id: step_id.to_string(),
            method: tokens[0].clone(),
        });
    }
    let url = tokens[1].clone();

    let mut request = RequestOptions {
        method,
        url,
        headers: Vec::new(),
        queries: Vec::new(),
        body: None,
        captures: Vec::new(),
        asserts: Vec::new(),
        verbose: false,
        no_record: false,
        max_duration_ms: None,
        retry: 0,
        retry_wait_ms: 1000,
        stream: false,
    };

    let mut i = 2;
    while i < tokens.len() {
        match tokens[i].as_str() {
            "--data" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    request.body = Some(v.clone());
                }
            }
            "--header" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    if let Some((name, value)) = split_header_line(v) {
                        request.headers.push((name, value));
                    }
                }
            }
            "--capture" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    if let Some((name, path)) = split_capture_line(v) {
                        request.captures.push(Capture { name, path });
                    }
                }
            }
            "--assert" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    if let Ok(assertion) = assertions::parse_line(v) {
                        request.asserts.push(assertion);
                    }
                }
            }
            "--retry" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    request.retry = v.parse().unwrap_or(0);
                }
            }
            "--retry-wait" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    request.retry_wait_ms = v.parse().unwrap_or(1000);
                }
            }
            "--max-duration" => {
                i += 1;
                if let Some(v) = tokens.get(i) {
                    request.max_duration_ms = v.parse().ok();
                }
            }
            "--no-record" => {
                request.no_record = true;
            }
            _ => {}
        }
        i += 1;
    }

    Ok(request)
}

/// Minimal shell-style tokenizer: splits on whitespace but honors
/// single and double quoted spans as one token.
fn shell_split(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                    in_token = true;
                } else if c.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(c);
                    in_token = true;
                }
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Splits a whole `.kest` file into steps: one test per non-comment,
/// non-blank line, or a multi-line block delimited by `---` on its
/// own line, reusing the step-block grammar (§4.C) for the latter.
pub fn parse_kest_file(text: &str) -> Result<Vec<(usize, RequestOptions)>, RunnerError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut results = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines[i].trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            i += 1;
            continue;
        }
        if trimmed == "---" {
            i += 1;
            continue;
        }

        let start_line = i + 1;
        let mut block_lines = Vec::new();
        while i < lines.len() && lines[i].trim() != "---" {
            let t = lines[i].trim();
            if !(t.is_empty() && block_lines.is_empty()) && !t.starts_with('#') {
                block_lines.push(lines[i]);
            }
            i += 1;
        }

        let non_blank: Vec<&&str> = block_lines.iter().filter(|l| !l.trim().is_empty()).collect();
        let step_id = format!("step_{}", start_line);
        let request = if non_blank.len() <= 1 {
            let line = non_blank.first().map(|s| **s).unwrap_or("");
            parse_legacy_line(line, &step_id)?
        } else {
            parse_request_block(&block_lines.join("\n"), &step_id)?
        };
        results.push((start_line, request));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_url_headers_and_json_body() {
        let text = "POST /api/v1/login\nContent-Type: application/json\n\n{\"user\":\"admin\",\"password\":\"p\"}\n";
        let req = parse_request_block(text, "s").unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/api/v1/login");
        assert_eq!(req.headers, vec![("Content-Type".to_string(), "application/json".to_string())]);
        assert_eq!(req.body.as_deref(), Some("{\"user\":\"admin\",\"password\":\"p\"}"));
    }

    #[test]
    fn parses_captures_and_asserts_sections() {
        let text = "POST /api/v1/login\n\n{}\n\n[Captures]\ntoken: data.access_token\n\n[Asserts]\nstatus == 200\n";
        let req = parse_request_block(text, "s").unwrap();
        assert_eq!(req.captures.len(), 1);
        assert_eq!(req.captures[0].name, "token");
        assert_eq!(req.captures[0].path, "data.access_token");
        assert_eq!(req.asserts.len(), 1);
    }

    #[test]
    fn parses_query_and_options_sections() {
        let text = "GET /items\n\n[Query]\npage=2\n\n[Options]\nretry=3\nretry-wait=50\nno-record=true\n";
        let req = parse_request_block(text, "s").unwrap();
        assert_eq!(req.queries, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(req.retry, 3);
        assert_eq!(req.retry_wait_ms, 50);
        assert!(req.no_record);
    }

    #[test]
    fn captures_accept_equals_sign_form() {
        let text = "GET /x\n\n[Captures]\nid = data.id\n";
        let req = parse_request_block(text, "s").unwrap();
        assert_eq!(req.captures[0].path, "data.id");
    }

    #[test]
    fn missing_method_url_is_an_error() {
        let result = parse_request_block("\n\n[Asserts]\nstatus == 200\n", "s");
        assert!(matches!(result, Err(RunnerError::MissingMethodUrl { .. })));
    }

    #[test]
    fn invalid_method_is_rejected() {
        let result = parse_request_block("FOO /x\n", "s");
        assert!(matches!(result, Err(RunnerError::InvalidHttpMethod { .. })));
    }

    #[test]
    fn blank_lines_inside_body_are_preserved() {
        let text = "POST /x\n\nline one\n\nline two\n\n[Asserts]\nstatus == 200\n";
        let req = parse_request_block(text, "s").unwrap();
        assert_eq!(req.body.as_deref(), Some("line one\n\nline two"));
    }

    #[test]
    fn legacy_line_parses_flags_with_quoting() {
        let req = parse_legacy_line(
            r#"GET /ping --header "X-Id: 1" --capture "token: data.id" --assert "status == 200" --retry 2"#,
            "s",
        )
        .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.headers[0], ("X-Id".to_string(), "1".to_string()));
        assert_eq!(req.captures[0].name, "token");
        assert_eq!(req.asserts.len(), 1);
        assert_eq!(req.retry, 2);
    }

    #[test]
    fn kest_file_splits_one_test_per_line() {
        let text = "# comment\nGET /a\nGET /b --retry 1\n";
        let parsed = parse_kest_file(text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].1.url, "/a");
        assert_eq!(parsed[1].1.retry, 1);
    }

    #[test]
    fn kest_file_parses_multiline_block_between_dashes() {
        let text = "---\nPOST /login\n\n{}\n\n[Asserts]\nstatus == 200\n---\nGET /b\n";
        let parsed = parse_kest_file(text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].1.method, "POST");
        assert_eq!(parsed[0].1.asserts.len(), 1);
        assert_eq!(parsed[1].1.method, "GET");
    }
}
