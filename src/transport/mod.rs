//! Transport layer (§4.G): sends an interpolated request and returns a
//! normalized [`Response`], regardless of wire protocol.
//!
//! Grounded in the teacher's `executors::http::HttpExecutor`, split
//! into a protocol-agnostic trait so a `.flow.md` step's `http`/`grpc`
//! kind can dispatch to either [`http::HttpTransport`] or
//! [`grpc::GrpcTransport`] without the scheduler caring which.

pub mod grpc;
pub mod http;

use crate::errors::RunnerError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A transport's view of a finished call, independent of protocol.
/// This is what the assertion evaluator and capture engine consume.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub duration_ms: u64,
    pub body: Value,
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn as_view(&self) -> crate::assertions::ResponseView<'_> {
        crate::assertions::ResponseView {
            status: self.status,
            duration_ms: self.duration_ms,
            body: &self.body,
            headers: &self.headers,
        }
    }
}

/// A fully-interpolated request, ready to send. Built by the scheduler
/// after running the document's `{{var}}` placeholders through the
/// variable store.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub queries: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
    /// §4.G step 5: caller requested SSE/NDJSON streaming explicitly.
    /// The transport also auto-detects it from the response's
    /// `Content-Type`, so this is an additional hint, not the only signal.
    pub stream: bool,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PreparedRequest) -> Result<Response, RunnerError>;
}

/// Picks a transport for a step kind. gRPC requests are recognized by
/// a `grpc://` scheme on the URL; everything else goes over HTTP.
pub fn select(url: &str) -> Box<dyn Transport> {
    if url.starts_with("grpc://") || url.starts_with("grpcs://") {
        Box::new(grpc::GrpcTransport::new())
    } else {
        Box::new(http::HttpTransport::new())
    }
}
