//! Session Logger (§4.I): an append-only record of every request/response
//! in a scenario run, written to `.kest/logs/<session>.log`.
//!
//! No direct teacher counterpart — the teacher relies entirely on
//! `tracing`/OTEL for observability and keeps no run artifact on disk.
//! The file-per-session shape here is grounded in the same "scoped
//! resource with guaranteed close" pattern the teacher uses for
//! `telemetry::shutdown_telemetry` (flush-on-exit), applied to a plain
//! file instead of a trace exporter.

use crate::errors::RunnerError;
use crate::scheduler::{StepOutcome, StepStatus};
use crate::transport::Response;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_DIR: &str = ".kest/logs";
const BODY_TRUNCATE_LEN: usize = 2048;

/// One open session's log file. `close()` is idempotent and safe to
/// call from a `Drop` impl as a last resort, but callers should call
/// it explicitly on every exit path (success, failure, early return).
pub struct SessionLogger {
    session: String,
    path: PathBuf,
    file: Option<File>,
}

impl SessionLogger {
    /// Opens (creating if needed) `.kest/logs/<name>.log` for append.
    pub fn start(name: &str) -> Result<Self, RunnerError> {
        fs::create_dir_all(LOG_DIR)?;
        let path = Path::new(LOG_DIR).join(format!("{}.log", name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            session: name.to_string(),
            path,
            file: Some(file),
        })
    }

    /// Appends a request/response record. Callers are responsible for
    /// checking `no_record` before calling this — it writes
    /// unconditionally.
    pub fn record_request(
        &mut self,
        step_id: &str,
        method: &str,
        url: &str,
        response: &Response,
    ) -> Result<(), RunnerError> {
        let body = truncate_body(&response.body);
        let line = format!(
            "{ts} step={step} method={method} url={url} status={status} duration_ms={dur} body={body}\n",
            ts = Utc::now().to_rfc3339(),
            step = step_id,
            method = method,
            url = url,
            status = response.status,
            dur = response.duration_ms,
            body = body,
        );
        self.write_line(&line)
    }

    /// Appends a one-line record for a step that never got a response
    /// (network error, skipped, or exec step).
    pub fn record_outcome(&mut self, outcome: &StepOutcome) -> Result<(), RunnerError> {
        let status = match outcome.status {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        let line = format!(
            "{ts} step={step} status={status} attempts={attempts} duration_ms={dur}{err}\n",
            ts = Utc::now().to_rfc3339(),
            step = outcome.step_id,
            status = status,
            attempts = outcome.attempts,
            dur = outcome.duration_ms,
            err = outcome
                .error
                .as_ref()
                .map(|e| format!(" error={:?}", e))
                .unwrap_or_default(),
        );
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> Result<(), RunnerError> {
        if let Some(file) = &mut self.file {
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// Flushes and releases the underlying file handle. Safe to call
    /// more than once. Returns the log path so the caller can print it.
    pub fn close(&mut self) -> &Path {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        &self.path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> &str {
        &self.session
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn truncate_body(body: &serde_json::Value) -> String {
    let rendered = body.to_string();
    if rendered.len() <= BODY_TRUNCATE_LEN {
        rendered
    } else {
        let mut truncated: String = rendered.chars().take(BODY_TRUNCATE_LEN).collect();
        truncated.push_str("...(truncated)");
        truncated
    }
}
