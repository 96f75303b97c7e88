// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dry runs of a flow against scripted inputs.
//!
//! Nothing is stored and no action is performed; actions are only listed.

use std::collections::BTreeMap;

use parley_core::flow::{ActionType, Flow, FlowExecutionState, QuickReply};
use serde::Serialize;

use crate::machine::{self, Entry, ExecutionStatus};
use crate::template;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationStep {
    pub input: String,
    pub status: ExecutionStatus,
    pub node_id: Option<String>,
    pub content: Option<String>,
    pub quick_replies: Vec<QuickReply>,
    /// Actions that would have run, as (node id, action).
    pub skipped_actions: Vec<(String, ActionType)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Feeds `inputs` to `flow` in order. The first input starts the flow
/// regardless of its trigger; inputs after the flow ends report `inactive`.
pub fn simulate(flow: &Flow, inputs: &[String], max_chained: usize) -> Vec<SimulationStep> {
    let scratch = BTreeMap::new();
    let mut state: Option<FlowExecutionState> = None;
    let mut started = false;
    let mut steps = Vec::with_capacity(inputs.len());

    for input in inputs {
        let (current, entry) = match state.take() {
            Some(state) => (state, Entry::Continue),
            None if !started => {
                started = true;
                (
                    FlowExecutionState::new(flow.id.clone(), flow.start_node_id.clone()),
                    Entry::Start,
                )
            }
            None => {
                steps.push(SimulationStep {
                    input: input.clone(),
                    status: ExecutionStatus::Inactive,
                    node_id: None,
                    content: None,
                    quick_replies: vec![],
                    skipped_actions: vec![],
                    detail: None,
                });
                continue;
            }
        };

        let step = machine::step(flow, current, entry, input, max_chained);
        let landed = step.landed();
        let skipped_actions = if step.status == ExecutionStatus::Stale {
            Vec::new()
        } else {
            step.visited
                .iter()
                .flat_map(|node| node.actions.iter().map(|a| (node.id.clone(), a.action_type)))
                .collect()
        };
        steps.push(SimulationStep {
            input: input.clone(),
            status: step.status,
            node_id: Some(step.state.current_node_id.clone()),
            content: landed
                .map(|node| template::render(&node.content, &step.state.variables, &scratch))
                .filter(|c| !c.trim().is_empty()),
            quick_replies: landed.map(|n| n.quick_replies.clone()).unwrap_or_default(),
            skipped_actions,
            detail: step.detail.clone(),
        });
        state = step.next_state();
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::sample_flow;
    use parley_core::flow::FlowAction;

    fn inputs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn walks_the_sample_flow_to_completion() {
        let mut flow = sample_flow();
        flow.nodes[3].actions.push(FlowAction {
            action_type: ActionType::Tag,
            config: BTreeMap::new(),
        });

        let steps = simulate(&flow, &inputs(&["hello", "oi", "Ana vip", "again"]), 16);
        let statuses: Vec<ExecutionStatus> = steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Started,
                ExecutionStatus::Advanced,
                ExecutionStatus::Completed,
                ExecutionStatus::Inactive,
            ]
        );
        assert_eq!(steps[1].content.as_deref(), Some("Your name?"));
        assert_eq!(steps[2].content.as_deref(), Some("Welcome back Ana vip"));
        assert_eq!(steps[2].skipped_actions, vec![("vip".to_string(), ActionType::Tag)]);
    }

    #[test]
    fn unmatched_input_keeps_position() {
        let steps = simulate(&sample_flow(), &inputs(&["hello", "what?", "oi"]), 16);
        assert_eq!(steps[1].status, ExecutionStatus::NoMatch);
        assert_eq!(steps[1].node_id.as_deref(), Some("start"));
        assert_eq!(steps[2].node_id.as_deref(), Some("node_2"));
    }
}
