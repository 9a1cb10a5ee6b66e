//! Scheduler (§4.H): turns a [`FlowDoc`] into executed steps.
//!
//! Two modes, grounded in two different teacher modules:
//! - Sequential (`run_sequential`) walks `FlowDoc::topological_order()`
//!   one step at a time, threading the variable store through
//!   captures — this is the only mode where captures are legal.
//! - Bounded-parallel-flat (`run_parallel`) ignores the edge graph and
//!   runs every step concurrently up to `--jobs`, adapted from the
//!   teacher's `planner::DagPlanner` (`Semaphore` + `JoinSet`), but
//!   flattened since the spec's parallel mode has no dependency
//!   ordering and forbids captures outright.
//!
//! Retry uses a **fixed delay** between attempts (`retryWait`), not
//! the teacher's exponential backoff in `retry::RetryExecutor` — a
//! deliberate redesign since the spec's retry directive has no
//! backoff-factor field.

use crate::assertions::{self, Assertion};
use crate::captures;
use crate::document::{FlowDoc, FlowStep, OnFail};
use crate::errors::RunnerError;
use crate::transport::{self, PreparedRequest};
use crate::variables::VariableStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    pub status: StepStatus,
    /// Empty for exec/skipped steps that never reached the transport.
    pub method: String,
    pub url: String,
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub error: Option<String>,
    pub failed_assertions: Vec<String>,
    /// The full response, when one was received — §4.I needs the body
    /// to write a structured session-log record, not just the status.
    pub response: Option<transport::Response>,
    /// Mirrors `RequestOptions::no_record` (§4.I: "steps marked
    /// `noRecord=true` are omitted"). The caller checks this, not
    /// `logger::SessionLogger`, which writes unconditionally.
    pub no_record: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub parallel: bool,
    pub jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            jobs: 4,
        }
    }
}

/// Runs `doc` under `config`, mutating `vars` with any captured
/// values (sequential mode only).
pub async fn run(
    doc: &FlowDoc,
    vars: &mut VariableStore,
    config: &SchedulerConfig,
) -> Result<Vec<StepOutcome>, RunnerError> {
    if config.parallel {
        for step in &doc.steps {
            if let Some(request) = &step.request {
                if !request.captures.is_empty() {
                    return Err(RunnerError::ParallelCapturesDisallowed {
                        step_id: step.id.clone(),
                    });
                }
            }
        }
        run_parallel(doc, vars, config.jobs).await
    } else {
        run_sequential(doc, vars).await
    }
}

#[instrument(skip(doc, vars))]
async fn run_sequential(
    doc: &FlowDoc,
    vars: &mut VariableStore,
) -> Result<Vec<StepOutcome>, RunnerError> {
    let order = doc.topological_order()?;
    let mut outcomes = Vec::with_capacity(order.len());
    let mut stopped = false;

    for step in &order {
        if stopped {
            outcomes.push(StepOutcome {
                step_id: step.id.clone(),
                status: StepStatus::Skipped,
                method: step.request.as_ref().map(|r| r.method.clone()).unwrap_or_default(),
                url: step.request.as_ref().map(|r| r.url.clone()).unwrap_or_default(),
                http_status: None,
                duration_ms: 0,
                attempts: 0,
                error: Some("skipped: a prior step stopped the scenario".to_string()),
                failed_assertions: vec![],
                response: None,
                no_record: true,
            });
            continue;
        }

        let outcome = run_one_step(step, vars).await;
        let on_fail = step.on_fail;
        let failed = outcome.status == StepStatus::Failed;
        outcomes.push(outcome);

        if failed && on_fail == OnFail::Stop {
            stopped = true;
        }
    }

    Ok(outcomes)
}

async fn run_one_step(step: &FlowStep, vars: &mut VariableStore) -> StepOutcome {
    let request = match &step.request {
        Some(r) => r,
        None => {
            return StepOutcome {
                step_id: step.id.clone(),
                status: StepStatus::Skipped,
                method: String::new(),
                url: String::new(),
                http_status: None,
                duration_ms: 0,
                attempts: 0,
                error: Some("exec steps are not executed".to_string()),
                failed_assertions: vec![],
                response: None,
                no_record: true,
            };
        }
    };

    let max_attempts = request.retry.max(0) + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let prepared = prepare_request(request, vars);
        let transport = transport::select(&prepared.url);
        let start = Instant::now();

        match transport.send(&prepared).await {
            // §4.G: a 5xx is retryable on its own, before assertions are
            // even considered — a flaky backend that eventually returns
            // 200 should pass, not fail on its first 500.
            Ok(response) if response.status >= 500 && attempt < max_attempts => {
                warn!(step_id = %step.id, attempt, status = response.status, "retryable server error");
                tokio::time::sleep(Duration::from_millis(request.retry_wait_ms)).await;
                continue;
            }
            Ok(response) => {
                let duration_ms = response.duration_ms;
                let failed_assertions = evaluate_assertions(&request.asserts, &response);

                if failed_assertions.is_empty() {
                    if !request.captures.is_empty() {
                        let outcomes = captures::run(&request.captures, &response.body);
                        let mut raw = HashMap::new();
                        captures::apply(&outcomes, &mut raw);
                        vars.extend(&raw);
                    }
                    let http_status = Some(response.status);
                    return StepOutcome {
                        step_id: step.id.clone(),
                        status: StepStatus::Passed,
                        method: request.method.clone(),
                        url: prepared.url.clone(),
                        http_status,
                        duration_ms,
                        attempts: attempt,
                        error: None,
                        failed_assertions: vec![],
                        response: Some(response),
                        no_record: request.no_record,
                    };
                }

                // Assertion mismatches are not retried: only network
                // errors and 5xx responses are, per §4.G.
                if step.on_fail == OnFail::Continue && !request.captures.is_empty() {
                    let outcomes = captures::run(&request.captures, &response.body);
                    let mut raw = HashMap::new();
                    captures::apply(&outcomes, &mut raw);
                    vars.extend(&raw);
                }
                let http_status = Some(response.status);
                return StepOutcome {
                    step_id: step.id.clone(),
                    status: StepStatus::Failed,
                    method: request.method.clone(),
                    url: prepared.url.clone(),
                    http_status,
                    duration_ms,
                    attempts: attempt,
                    error: Some(format!("{} assertion(s) failed", failed_assertions.len())),
                    failed_assertions,
                    response: Some(response),
                    no_record: request.no_record,
                };
            }
            Err(e) => {
                warn!(step_id = %step.id, attempt, error = %e, "step attempt failed");
                if attempt >= max_attempts {
                    return StepOutcome {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        method: request.method.clone(),
                        url: prepared.url.clone(),
                        http_status: None,
                        duration_ms: start.elapsed().as_millis() as u64,
                        attempts: attempt,
                        error: Some(e.to_string()),
                        failed_assertions: vec![],
                        response: None,
                        no_record: request.no_record,
                    };
                }
                tokio::time::sleep(Duration::from_millis(request.retry_wait_ms)).await;
            }
        }
    }
}

fn prepare_request(
    request: &crate::document::RequestOptions,
    vars: &VariableStore,
) -> PreparedRequest {
    let url = resolve_url(&vars.interpolate(&request.url), vars);
    let headers = request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), vars.interpolate(v)))
        .collect();
    let queries = request
        .queries
        .iter()
        .map(|(k, v)| (k.clone(), vars.interpolate(v)))
        .collect();
    let body = request.body.as_ref().map(|b| {
        let interpolated = vars.interpolate(b);
        serde_json::from_str(&interpolated).unwrap_or(serde_json::Value::String(interpolated))
    });

    PreparedRequest {
        method: request.method.clone(),
        url,
        headers,
        queries,
        body,
        timeout_ms: request.max_duration_ms.unwrap_or(30_000),
        stream: request.stream,
    }
}

/// §4.G step 2: a URL with no scheme is relative and gets the active
/// environment's `base_url` prepended. `base_url` is seeded into the
/// variable store like any other variable (§4.J step 2), so this is
/// just a lookup, not a separate config plumb-through.
fn resolve_url(url: &str, vars: &VariableStore) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("grpc://") || url.starts_with("grpcs://") {
        return url.to_string();
    }
    match vars.get("base_url") {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), url),
        None => url.to_string(),
    }
}

fn evaluate_assertions(asserts: &[Assertion], response: &transport::Response) -> Vec<String> {
    let view = response.as_view();
    asserts
        .iter()
        .filter_map(|a| {
            let result = assertions::evaluate(a, &view);
            if result.pass {
                None
            } else {
                Some(result.detail)
            }
        })
        .collect()
}

/// Runs every request step concurrently, up to `jobs` at a time,
/// ignoring edges entirely. Captures are rejected by the caller
/// before this function is reached.
async fn run_parallel(
    doc: &FlowDoc,
    vars: &VariableStore,
    jobs: usize,
) -> Result<Vec<StepOutcome>, RunnerError> {
    let jobs = jobs.max(1);
    let semaphore = Arc::new(Semaphore::new(jobs));
    let results: Arc<Mutex<Vec<(usize, StepOutcome)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut join_set = JoinSet::new();

    let snapshot: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

    for (idx, step) in doc.steps.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let results = Arc::clone(&results);
        let vars_snapshot = snapshot.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let mut local_vars = VariableStore::new();
            local_vars.extend(&vars_snapshot);
            let outcome = run_one_step(&step, &mut local_vars).await;
            results.lock().await.push((idx, outcome));
        });
    }

    while join_set.join_next().await.is_some() {}

    let mut ordered = results.lock().await.clone();
    ordered.sort_by_key(|(idx, _)| *idx);
    info!(step_count = ordered.len(), "parallel run finished");
    Ok(ordered.into_iter().map(|(_, o)| o).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FlowMeta, RequestOptions, StepKind};

    fn http_step(id: &str, url: &str, line: usize) -> FlowStep {
        FlowStep {
            id: id.to_string(),
            name: None,
            kind: StepKind::Http,
            on_fail: OnFail::Stop,
            line_num: line,
            request: Some(RequestOptions {
                method: "GET".to_string(),
                url: url.to_string(),
                headers: vec![],
                queries: vec![],
                body: None,
                captures: vec![],
                asserts: vec![],
                verbose: false,
                no_record: false,
                max_duration_ms: Some(1000),
                retry: 1,
                retry_wait_ms: 0,
                stream: false,
            }),
            exec: None,
        }
    }

    #[test]
    fn prepare_request_interpolates_url_and_headers() {
        let mut vars = VariableStore::new();
        vars.set("host", "api.test");
        let mut request = match http_step("s", "https://{{host}}/ping", 1).request {
            Some(r) => r,
            None => unreachable!(),
        };
        request.headers.push(("X-Id".to_string(), "{{host}}".to_string()));
        let prepared = prepare_request(&request, &vars);
        assert_eq!(prepared.url, "https://api.test/ping");
        assert_eq!(prepared.headers[0].1, "api.test");
    }

    #[tokio::test]
    async fn parallel_mode_rejects_captures() {
        let mut step = http_step("s", "https://example.test", 1);
        if let Some(r) = &mut step.request {
            r.captures.push(crate::captures::Capture {
                name: "x".to_string(),
                path: "a".to_string(),
            });
        }
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step],
            edges: vec![],
        };
        let mut vars = VariableStore::new();
        let config = SchedulerConfig { parallel: true, jobs: 2 };
        let result = run(&doc, &mut vars, &config).await;
        assert!(matches!(result, Err(RunnerError::ParallelCapturesDisallowed { .. })));
    }

    // The remaining tests hit a real (mocked) HTTP server end to end,
    // covering spec.md's explicit boundary cases rather than just the
    // pure functions above.

    #[tokio::test]
    async fn relative_url_resolves_against_base_url() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let mut vars = VariableStore::new();
        vars.set("base_url", server.uri());
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![http_step("ping", "/ping", 1)],
            edges: vec![],
        };

        let outcomes = run(&doc, &mut vars, &SchedulerConfig::default())
            .await
            .expect("scheduler should run");
        assert_eq!(outcomes[0].status, StepStatus::Passed);
        assert_eq!(outcomes[0].http_status, Some(200));
    }

    /// S3: a step with retry=2 that sees 500, 500, 200 should pass on the
    /// third attempt — retries are a transport concern, not triggered by
    /// assertion mismatches.
    #[tokio::test]
    async fn retry_recovers_after_two_server_errors() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut vars = VariableStore::new();
        let mut step = http_step("flaky", &format!("{}/flaky", server.uri()), 1);
        if let Some(r) = &mut step.request {
            r.retry = 2;
            r.retry_wait_ms = 5;
        }
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step],
            edges: vec![],
        };

        let outcomes = run(&doc, &mut vars, &SchedulerConfig::default())
            .await
            .expect("scheduler should run");
        assert_eq!(outcomes[0].status, StepStatus::Passed);
        assert_eq!(outcomes[0].attempts, 3);
    }

    #[tokio::test]
    async fn a_failing_step_with_stop_on_fail_skips_the_rest() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut vars = VariableStore::new();
        let url = format!("{}/broken", server.uri());
        let mut first = http_step("broken", &url, 1);
        if let Some(r) = &mut first.request {
            r.asserts.push(
                crate::assertions::parse_line("status == 200").expect("valid assertion"),
            );
        }
        let second = http_step("never_runs", &url, 2);

        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![first, second],
            edges: vec![],
        };

        let outcomes = run(&doc, &mut vars, &SchedulerConfig::default())
            .await
            .expect("scheduler should run");
        assert_eq!(outcomes[0].status, StepStatus::Failed);
        assert_eq!(outcomes[1].status, StepStatus::Skipped);
    }
}
