// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure graph stepping, shared by the engine and the simulator.

use parley_core::flow::{Flow, FlowExecutionState, FlowNode, NodeType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transition;

/// Outcome of feeding one input to a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// No flow running and none triggered.
    Inactive,
    /// A flow was triggered and its start node executed.
    Started,
    /// A running flow moved to a new node.
    Advanced,
    /// An `end` node was reached and the execution cleared.
    Completed,
    /// No transition accepted the input. The execution is kept.
    NoMatch,
    /// The execution points at a flow or node that no longer exists.
    Stale,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Inactive => "inactive",
            ExecutionStatus::Started => "started",
            ExecutionStatus::Advanced => "advanced",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::NoMatch => "no_match",
            ExecutionStatus::Stale => "stale",
        }
    }
}

pub(crate) enum Entry {
    Start,
    Continue,
}

pub(crate) struct Step<'f> {
    pub status: ExecutionStatus,
    /// Nodes entered during this step, in order. Their actions run.
    pub visited: Vec<&'f FlowNode>,
    /// Execution state as of the end of the step, variables included.
    pub state: FlowExecutionState,
    pub detail: Option<String>,
}

impl<'f> Step<'f> {
    fn stale(visited: Vec<&'f FlowNode>, state: FlowExecutionState, detail: String) -> Self {
        Self {
            status: ExecutionStatus::Stale,
            visited,
            state,
            detail: Some(detail),
        }
    }

    /// State to keep in the context. `None` once the flow is over.
    pub fn next_state(&self) -> Option<FlowExecutionState> {
        match self.status {
            ExecutionStatus::Completed | ExecutionStatus::Stale | ExecutionStatus::Inactive => None,
            _ => Some(self.state.clone()),
        }
    }

    /// The node whose content answers the input.
    pub fn landed(&self) -> Option<&'f FlowNode> {
        match self.status {
            ExecutionStatus::Started | ExecutionStatus::Advanced | ExecutionStatus::Completed => {
                self.visited.last().copied()
            }
            _ => None,
        }
    }
}

/// Feeds `input` to `flow` from `state`.
///
/// On [`Entry::Start`] the start node is entered without evaluating its
/// transitions. Condition nodes are evaluated against the same input as soon
/// as they are entered, at most `max_chained` times per step.
pub(crate) fn step<'f>(
    flow: &'f Flow,
    mut state: FlowExecutionState,
    entry: Entry,
    input: &str,
    max_chained: usize,
) -> Step<'f> {
    let mut visited = Vec::new();

    let (mut node, status) = match entry {
        Entry::Start => match flow.node(&flow.start_node_id) {
            Some(node) => (node, ExecutionStatus::Started),
            None => {
                return Step::stale(
                    visited,
                    state,
                    format!("start node {} missing from flow {}", flow.start_node_id, flow.id),
                );
            }
        },
        Entry::Continue => {
            let Some(current) = flow.node(&state.current_node_id) else {
                let detail = format!("node {} missing from flow {}", state.current_node_id, flow.id);
                return Step::stale(visited, state, detail);
            };
            if current.node_type == NodeType::Question {
                state
                    .variables
                    .insert(current.id.clone(), Value::String(input.trim().to_string()));
            }
            let Some(chosen) = transition::select(current, input) else {
                return Step {
                    status: ExecutionStatus::NoMatch,
                    visited,
                    state,
                    detail: None,
                };
            };
            match flow.node(&chosen.to_node_id) {
                Some(node) => (node, ExecutionStatus::Advanced),
                None => {
                    return Step::stale(
                        visited,
                        state,
                        format!("transition target {} missing from flow {}", chosen.to_node_id, flow.id),
                    );
                }
            }
        }
    };

    let mut chained = 0;
    loop {
        visited.push(node);
        if node.node_type != NodeType::Condition {
            break;
        }
        chained += 1;
        if chained > max_chained {
            return Step::stale(
                visited,
                state,
                format!("more than {max_chained} chained condition nodes in flow {}", flow.id),
            );
        }
        let Some(chosen) = transition::select(node, input) else {
            state.current_node_id = node.id.clone();
            return Step {
                status: ExecutionStatus::NoMatch,
                visited,
                state,
                detail: None,
            };
        };
        node = match flow.node(&chosen.to_node_id) {
            Some(next) => next,
            None => {
                return Step::stale(
                    visited,
                    state,
                    format!("transition target {} missing from flow {}", chosen.to_node_id, flow.id),
                );
            }
        };
    }

    state.current_node_id = node.id.clone();
    if node.node_type == NodeType::End {
        Step {
            status: ExecutionStatus::Completed,
            visited,
            state,
            detail: None,
        }
    } else {
        Step {
            status,
            visited,
            state,
            detail: None,
        }
    }
}
