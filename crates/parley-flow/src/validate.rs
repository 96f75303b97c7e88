// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static checks on flow definitions.

use std::collections::HashSet;

use parley_core::flow::{Flow, TransitionCondition};
use parley_core::ParleyError;
use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts the report into an error listing every problem.
    pub fn into_result(self) -> Result<Vec<String>, ParleyError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ParleyError::Flow(self.errors.join("; ")))
        }
    }
}

/// Checks a flow without stopping at the first problem.
pub fn validate(flow: &Flow) -> ValidationReport {
    let mut report = ValidationReport::default();

    if flow.nodes.is_empty() {
        report.errors.push(format!("flow {} has no nodes", flow.id));
        return report;
    }

    let mut ids = HashSet::new();
    for node in &flow.nodes {
        if node.id.trim().is_empty() {
            report.errors.push("node with an empty id".to_string());
        }
        if !ids.insert(node.id.as_str()) {
            report.errors.push(format!("duplicate node id {}", node.id));
        }
    }

    if !ids.contains(flow.start_node_id.as_str()) {
        report
            .errors
            .push(format!("start node {} does not exist", flow.start_node_id));
    }

    for node in &flow.nodes {
        let mut defaults = 0;
        for (i, transition) in node.transitions.iter().enumerate() {
            if !ids.contains(transition.to_node_id.as_str()) {
                report.errors.push(format!(
                    "node {} transitions to missing node {}",
                    node.id, transition.to_node_id
                ));
            }
            let value = transition.value.as_deref().filter(|v| !v.is_empty());
            match transition.condition {
                TransitionCondition::Default => {
                    defaults += 1;
                    if i != node.transitions.len() - 1 {
                        report.warnings.push(format!(
                            "node {}: default transition at position {} shadows the ones after it",
                            node.id,
                            i + 1
                        ));
                    }
                }
                condition if value.is_none() => report.errors.push(format!(
                    "node {}: {condition} transition to {} has no value",
                    node.id, transition.to_node_id
                )),
                TransitionCondition::Regex => {
                    let pattern = value.unwrap_or_default();
                    if let Err(e) = Regex::new(pattern) {
                        report
                            .errors
                            .push(format!("node {}: invalid regex {pattern:?}: {e}", node.id));
                    }
                }
                _ => {}
            }
        }
        if defaults > 1 {
            report.warnings.push(format!(
                "node {} has {defaults} default transitions, the first declared wins",
                node.id
            ));
        }
    }

    report
}
