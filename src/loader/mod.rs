//! Scenario loading: dispatches on file extension (§4.J step 1) —
//! `.md` goes through the Markdown/Block Parser, anything else
//! through the legacy `.kest` line parser — and returns a [`FlowDoc`]
//! either way so the scheduler never needs to know which format a
//! scenario came from.

use crate::document::{FlowDoc, FlowMeta, FlowStep, OnFail, StepKind};
use crate::errors::RunnerError;
use crate::{markdown, requestparser};
use std::path::Path;

pub fn load_scenario(path: &Path) -> Result<FlowDoc, RunnerError> {
    let content = std::fs::read_to_string(path)?;
    let is_markdown = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false);

    if is_markdown {
        let output = markdown::parse_flow_markdown(&content)?;
        for warning in &output.warnings {
            tracing::warn!("{}", warning);
        }
        Ok(output.doc)
    } else {
        load_kest(&content)
    }
}

fn load_kest(content: &str) -> Result<FlowDoc, RunnerError> {
    let parsed = requestparser::parse_kest_file(content)?;
    let steps = parsed
        .into_iter()
        .map(|(line_num, request)| FlowStep {
            id: FlowStep::derived_id(line_num),
            name: None,
            kind: StepKind::Http,
            on_fail: OnFail::Stop,
            line_num,
            request: Some(request),
            exec: None,
        })
        .collect();

    Ok(FlowDoc {
        meta: FlowMeta::default(),
        steps,
        edges: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("kest-loader-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn dispatches_markdown_extension_to_block_parser() {
        let path = write_temp("s1.flow.md", "```step\n@id a\n\nGET /x\n```\n");
        let doc = load_scenario(&path).unwrap();
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps[0].id, "a");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn dispatches_kest_extension_to_legacy_parser() {
        let path = write_temp("s1.kest", "GET /a\nGET /b\n");
        let doc = load_scenario(&path).unwrap();
        assert_eq!(doc.steps.len(), 2);
        assert!(doc.edges.is_empty());
        let _ = std::fs::remove_file(path);
    }
}
