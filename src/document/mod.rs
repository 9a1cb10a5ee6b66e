//! Flow Document Model: the parsed, typed shape of a `.flow.md` scenario.
//!
//! A [`FlowDoc`] is meta + steps + edges. Cycle detection and
//! topological ordering live here (Kahn's algorithm), not in the
//! scheduler — by the time a `FlowDoc` reaches the scheduler it is
//! already known to be a DAG.

use crate::assertions::Assertion;
use crate::captures::Capture;
use crate::errors::RunnerError;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowMeta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub env: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFail {
    Stop,
    Continue,
}

impl Default for OnFail {
    fn default() -> Self {
        OnFail::Stop
    }
}

impl OnFail {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(OnFail::Stop),
            "continue" => Some(OnFail::Continue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    Http,
    Exec,
}

impl Default for StepKind {
    fn default() -> Self {
        StepKind::Http
    }
}

/// A single request's shape, before interpolation. All string fields
/// may still contain `{{var}}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub queries: Vec<(String, String)>,
    pub body: Option<String>,
    pub captures: Vec<Capture>,
    pub asserts: Vec<Assertion>,
    pub verbose: bool,
    pub no_record: bool,
    pub max_duration_ms: Option<u64>,
    pub retry: u32,
    pub retry_wait_ms: u64,
    pub stream: bool,
}

/// `exec` steps are recognized but, per the non-goals, never
/// evaluated: the raw script text is carried through for tooling
/// (editors, linters) to inspect.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub script: String,
}

#[derive(Debug, Clone)]
pub struct FlowStep {
    pub id: String,
    pub name: Option<String>,
    pub kind: StepKind,
    pub on_fail: OnFail,
    pub line_num: usize,
    pub request: Option<RequestOptions>,
    pub exec: Option<ExecOptions>,
}

impl FlowStep {
    /// A step with no explicit `@id` is named after its source line,
    /// matching the legacy `.kest` convention of one test per line.
    pub fn derived_id(line_num: usize) -> String {
        format!("step_{}", line_num)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOn {
    Success,
    Failure,
    Always,
}

impl Default for EdgeOn {
    fn default() -> Self {
        EdgeOn::Success
    }
}

impl EdgeOn {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(EdgeOn::Success),
            "failure" => Some(EdgeOn::Failure),
            "always" => Some(EdgeOn::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    pub on: EdgeOn,
    pub line_num: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FlowDoc {
    pub meta: FlowMeta,
    pub steps: Vec<FlowStep>,
    pub edges: Vec<FlowEdge>,
}

impl FlowDoc {
    /// Validates edge references, then computes a topological order
    /// via Kahn's algorithm. Ties (steps with equal in-degree) break
    /// by source line number, so a document with no edges at all
    /// simply runs in source order.
    ///
    /// Returns `Err(CycleDetected)` if the edge set contains a cycle.
    /// Returns `Err(UnknownEdgeReference)` if an edge names a step
    /// that doesn't exist.
    pub fn topological_order(&self) -> Result<Vec<FlowStep>, RunnerError> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        for edge in &self.edges {
            if !ids.contains(edge.from.as_str()) {
                return Err(RunnerError::UnknownEdgeReference {
                    step_id: edge.from.clone(),
                });
            }
            if !ids.contains(edge.to.as_str()) {
                return Err(RunnerError::UnknownEdgeReference {
                    step_id: edge.to.clone(),
                });
            }
        }

        if self.edges.is_empty() {
            let mut steps = self.steps.clone();
            steps.sort_by_key(|s| s.line_num);
            return Ok(steps);
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), 0usize))
            .collect();

        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
            *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
        }

        let by_id: HashMap<&str, &FlowStep> =
            self.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        // Ready queue ordered by line number for a deterministic,
        // source-order-respecting tie-break.
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_by_key(|id| by_id[id].line_num);
        let mut queue: VecDeque<&str> = ready.into_iter().collect();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(id) = queue.pop_front() {
            order.push(by_id[id].clone());
            if let Some(children) = adjacency.get(id) {
                let mut newly_ready = Vec::new();
                for child in children {
                    let deg = in_degree.get_mut(child).expect("child in in_degree map");
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(*child);
                    }
                }
                newly_ready.sort_by_key(|cid| by_id[cid].line_num);
                for child in newly_ready {
                    // insertion sort keeps the queue globally line-ordered
                    let pos = queue
                        .iter()
                        .position(|q| by_id[q].line_num > by_id[child].line_num)
                        .unwrap_or(queue.len());
                    queue.insert(pos, child);
                }
            }
        }

        if order.len() < self.steps.len() {
            let stuck = self
                .steps
                .iter()
                .find(|s| !order.iter().any(|o| o.id == s.id))
                .expect("fewer ordered steps than declared implies a stuck step exists");
            return Err(RunnerError::CycleDetected {
                step_id: stuck.id.clone(),
            });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, line: usize) -> FlowStep {
        FlowStep {
            id: id.to_string(),
            name: None,
            kind: StepKind::Http,
            on_fail: OnFail::Stop,
            line_num: line,
            request: None,
            exec: None,
        }
    }

    fn edge(from: &str, to: &str, line: usize) -> FlowEdge {
        FlowEdge {
            from: from.to_string(),
            to: to.to_string(),
            on: EdgeOn::Success,
            line_num: line,
        }
    }

    #[test]
    fn empty_edges_preserves_source_order() {
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step("b", 2), step("a", 1)],
            edges: vec![],
        };
        let order = doc.topological_order().unwrap();
        assert_eq!(order.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn linear_chain_orders_by_dependency() {
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step("a", 1), step("b", 2), step("c", 3)],
            edges: vec![edge("a", "b", 1), edge("b", "c", 2)],
        };
        let order = doc.topological_order().unwrap();
        assert_eq!(order.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_shape_resolves_deterministically() {
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step("a", 1), step("b", 2), step("c", 3), step("d", 4)],
            edges: vec![
                edge("a", "b", 1),
                edge("a", "c", 2),
                edge("b", "d", 3),
                edge("c", "d", 4),
            ],
        };
        let order = doc.topological_order().unwrap();
        assert_eq!(order.first().unwrap().id, "a");
        assert_eq!(order.last().unwrap().id, "d");
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step("a", 1), step("b", 2)],
            edges: vec![edge("a", "b", 1), edge("b", "a", 2)],
        };
        assert!(matches!(
            doc.topological_order(),
            Err(RunnerError::CycleDetected { .. })
        ));
    }

    #[test]
    fn edge_to_unknown_step_is_rejected() {
        let doc = FlowDoc {
            meta: FlowMeta::default(),
            steps: vec![step("a", 1)],
            edges: vec![edge("a", "ghost", 1)],
        };
        assert!(matches!(
            doc.topological_order(),
            Err(RunnerError::UnknownEdgeReference { .. })
        ));
    }
}
