//! HTTP transport. Request building mirrors the teacher's
//! `executors::http::HttpExecutor::execute` — method/URL/query/header/
//! body assembly, timeout application — with assertion validation and
//! extraction removed (those now live in `assertions` and `captures`,
//! operating on the returned [`super::Response`]).

use super::{PreparedRequest, Response, Transport};
use crate::errors::RunnerError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(
        name = "http_request",
        skip_all,
        fields(
            http.method = %request.method,
            http.url = %request.url,
            http.status_code = tracing::field::Empty,
            http.duration_ms = tracing::field::Empty,
            otel.kind = "client"
        )
    )]
    async fn send(&self, request: &PreparedRequest) -> Result<Response, RunnerError> {
        let span = tracing::Span::current();
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            RunnerError::InvalidHttpMethod {
                step_id: request.url.clone(),
                method: request.method.clone(),
            }
        })?;

        let mut url = request.url.clone();
        if !request.queries.is_empty() {
            let parts: Vec<String> = request
                .queries
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        urlencoding::encode(k),
                        urlencoding::encode(v)
                    )
                })
                .collect();
            let sep = if url.contains('?') { "&" } else { "?" };
            url = format!("{}{}{}", url, sep, parts.join("&"));
        }

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(request.timeout_ms));
        let has_content_type = request
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &request.body {
            // §4.G step 3: default Content-Type when the step didn't set one.
            if !has_content_type {
                builder = builder.header("Content-Type", "application/json");
            }
            builder = builder.json(body);
        }

        let start = Instant::now();
        let result = builder.send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = result.map_err(|source| {
            if source.is_timeout() {
                RunnerError::TimeoutError {
                    url: url.clone(),
                    elapsed_ms: duration_ms,
                }
            } else {
                RunnerError::NetworkError { url: url.clone(), source }
            }
        })?;

        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        let is_streaming = request.stream
            || content_type.contains("text/event-stream")
            || content_type.contains("x-ndjson");

        let raw_body = if is_streaming {
            read_streaming_body(resp, &url).await?
        } else {
            resp.text().await.map_err(|source| RunnerError::ProtocolError {
                url: url.clone(),
                reason: source.to_string(),
            })?
        };
        let body: Value = serde_json::from_str(&raw_body).unwrap_or(Value::Null);

        span.record("http.status_code", status as i64);
        span.record("http.duration_ms", duration_ms as i64);
        tracing::info!(method = %request.method, %url, status, duration_ms, "HTTP step finished");

        Ok(Response {
            status,
            duration_ms,
            body,
            headers,
        })
    }
}

/// §4.G step 5: "the executor yields response lines through a bounded
/// channel; the logger drains it; the final assembled body is returned
/// when the stream terminates." There's no session logger handle this
/// deep in the transport, so the progressive side is a `debug!` event
/// per line instead of a channel — the scheduler's session logger
/// still gets the final assembled body like any other response.
async fn read_streaming_body(resp: reqwest::Response, url: &str) -> Result<String, RunnerError> {
    let mut stream = resp.bytes_stream();
    let mut full = Vec::new();
    let mut pending_line = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| RunnerError::ProtocolError {
            url: url.to_string(),
            reason: source.to_string(),
        })?;
        full.extend_from_slice(&chunk);
        pending_line.extend_from_slice(&chunk);
        while let Some(pos) = pending_line.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending_line.drain(..=pos).collect();
            tracing::debug!(url = %url, line = %String::from_utf8_lossy(&line), "streamed line");
        }
    }
    if !pending_line.is_empty() {
        tracing::debug!(url = %url, line = %String::from_utf8_lossy(&pending_line), "streamed line");
    }

    Ok(String::from_utf8_lossy(&full).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_method_is_rejected_before_any_network_call() {
        let request = PreparedRequest {
            method: "NOT A METHOD".to_string(),
            url: "http://example.test/".to_string(),
            headers: vec![],
            queries: vec![],
            body: None,
            timeout_ms: 1000,
            stream: false,
        };
        let transport = HttpTransport::new();
        let result = futures::executor::block_on(transport.send(&request));
        assert!(matches!(result, Err(RunnerError::InvalidHttpMethod { .. })));
    }
}
