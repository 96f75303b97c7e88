// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley flow validate` and `parley flow simulate`.

use std::path::Path;

use parley_core::flow::Flow;
use parley_core::ParleyError;
use parley_flow::{simulate, validate, SimulationStep};

fn read_flow(path: &Path) -> Result<Flow, ParleyError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ParleyError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ParleyError::Flow(format!("{} is not a flow definition: {e}", path.display())))
}

/// Prints every problem found. Exit code 1 when the flow has errors.
pub fn run_validate(path: &Path) -> i32 {
    let flow = match read_flow(path) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    let report = validate(&flow);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    if report.is_valid() {
        println!("flow {} is valid ({} nodes)", flow.id, flow.nodes.len());
        0
    } else {
        1
    }
}

pub fn run_simulate(path: &Path, inputs: &[String], max_chained: usize) -> i32 {
    let flow = match read_flow(path) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    let report = validate(&flow);
    if !report.is_valid() {
        for error in &report.errors {
            eprintln!("error: {error}");
        }
        return 1;
    }
    for (i, step) in simulate(&flow, inputs, max_chained).iter().enumerate() {
        println!("{}", describe(i + 1, step));
    }
    0
}

fn describe(n: usize, step: &SimulationStep) -> String {
    let mut line = format!("{n}. > {:?} [{}]", step.input, step.status.as_str());
    if let Some(node) = &step.node_id {
        line.push_str(&format!(" node={node}"));
    }
    if let Some(content) = &step.content {
        line.push_str(&format!("\n   < {content}"));
    }
    if !step.quick_replies.is_empty() {
        let titles: Vec<&str> = step.quick_replies.iter().map(|q| q.title.as_str()).collect();
        line.push_str(&format!("\n   options: {}", titles.join(" | ")));
    }
    for (node, action) in &step.skipped_actions {
        line.push_str(&format!("\n   would run {action} on {node}"));
    }
    if let Some(detail) = &step.detail {
        line.push_str(&format!("\n   note: {detail}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FLOW: &str = r#"{
        "id": "f1",
        "tenant_id": "t1",
        "name": "greeting",
        "trigger": "welcome",
        "start_node_id": "start",
        "nodes": [
            {"id": "start", "type": "question", "content": "Say oi",
             "transitions": [{"to_node_id": "bye", "condition": "contains", "value": "oi"}]},
            {"id": "bye", "type": "end", "content": "Bye"}
        ]
    }"#;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn valid_flow_passes() {
        let file = write(FLOW);
        assert_eq!(run_validate(file.path()), 0);
    }

    #[test]
    fn missing_start_node_fails() {
        let file = write(&FLOW.replace("\"start_node_id\": \"start\"", "\"start_node_id\": \"n9\""));
        assert_eq!(run_validate(file.path()), 1);
    }

    #[test]
    fn garbage_file_fails() {
        let file = write("not json");
        assert_eq!(run_validate(file.path()), 1);
        assert_eq!(run_simulate(file.path(), &[], 16), 1);
    }

    #[test]
    fn simulate_runs_inputs() {
        let file = write(FLOW);
        let inputs = vec!["hello".to_string(), "oi".to_string()];
        assert_eq!(run_simulate(file.path(), &inputs, 16), 0);
    }
}
