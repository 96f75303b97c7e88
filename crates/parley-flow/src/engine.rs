// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow execution against a locked conversation context.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_config::model::{FlowConfig, IdempotencyConfig};
use parley_context::ContextGuard;
use parley_core::flow::{FlowExecutionState, QuickReply};
use parley_core::types::Message;
use parley_core::{ParleyError, StorageAdapter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::actions::{ActionEffect, ActionOutcome, ActionRunner, ActionScope};
use crate::machine::{self, Entry, ExecutionStatus};
use crate::template;
use crate::trigger::{self, TriggerSignals};

/// Marker scope for per-message advance results.
pub const MARKER_SCOPE: &str = "flow";

/// Upstream facts about the inbound message used for flow triggering.
#[derive(Debug, Clone, Default)]
pub struct FlowSignals {
    pub tenant_id: String,
    pub bot_id: Option<String>,
    pub is_new_conversation: bool,
    pub detected_intent: Option<String>,
}

/// Escalation requested by an `escalate` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEscalation {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What one inbound message did to the conversation's flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub message_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub flow_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    /// Rendered content of the node the flow landed on.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default)]
    pub actions: Vec<ActionOutcome>,
    #[serde(default)]
    pub escalation: Option<FlowEscalation>,
    /// Why the execution is stale.
    #[serde(default)]
    pub detail: Option<String>,
    /// Flow state after the message, reapplied on replay.
    #[serde(default)]
    pub state_after: Option<FlowExecutionState>,
    /// Scratch variables set by actions, reapplied on replay.
    #[serde(default)]
    pub variables_set: BTreeMap<String, Value>,
    /// True when this result came from the idempotency marker.
    #[serde(skip)]
    pub replayed: bool,
}

impl ExecutionResult {
    fn new(message_id: &str, status: ExecutionStatus) -> Self {
        Self {
            message_id: message_id.to_string(),
            status,
            flow_id: None,
            node_id: None,
            content: None,
            quick_replies: Vec::new(),
            actions: Vec::new(),
            escalation: None,
            detail: None,
            state_after: None,
            variables_set: BTreeMap::new(),
            replayed: false,
        }
    }

    /// Result for a message that no flow handles.
    pub fn inactive(message_id: &str) -> Self {
        Self::new(message_id, ExecutionStatus::Inactive)
    }

    /// True if the flow has something to say to the customer.
    pub fn produced_output(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Started | ExecutionStatus::Advanced | ExecutionStatus::Completed
        ) && self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    pub fn is_stale(&self) -> bool {
        self.status == ExecutionStatus::Stale
    }

    /// Flow id if this message finished a flow.
    pub fn completed_flow(&self) -> Option<&str> {
        match self.status {
            ExecutionStatus::Completed => self.flow_id.as_deref(),
            _ => None,
        }
    }
}

pub struct FlowEngine {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    actions: ActionRunner,
    max_chained_nodes: usize,
    marker_ttl: Duration,
}

impl FlowEngine {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        flow: &FlowConfig,
        idempotency: &IdempotencyConfig,
    ) -> Result<Self, ParleyError> {
        Ok(Self {
            actions: ActionRunner::new(storage.clone(), flow)?,
            storage,
            max_chained_nodes: flow.max_chained_nodes,
            marker_ttl: Duration::from_secs(idempotency.marker_ttl_secs),
        })
    }

    /// Feeds `message` to the conversation's flow.
    ///
    /// The caller holds `guard` and is responsible for saving it. A repeat
    /// call for the same message id replays the stored result and reapplies
    /// its state changes without running actions again.
    pub async fn advance(
        &self,
        guard: &mut ContextGuard<'_>,
        message: &Message,
        signals: &FlowSignals,
    ) -> Result<ExecutionResult, ParleyError> {
        if let Some(raw) = self.storage.get_marker(MARKER_SCOPE, &message.id).await? {
            match serde_json::from_str::<ExecutionResult>(&raw) {
                Ok(mut result) => {
                    debug!(
                        conversation_id = guard.conversation_id(),
                        message_id = message.id.as_str(),
                        status = result.status.as_str(),
                        "replaying flow result"
                    );
                    apply(guard, &result);
                    result.replayed = true;
                    return Ok(result);
                }
                Err(e) => warn!(
                    message_id = message.id.as_str(),
                    error = %e,
                    "unreadable flow marker, evaluating again"
                ),
            }
        }

        let result = self.evaluate(guard, message, signals).await?;
        apply(guard, &result);

        let encoded = serde_json::to_string(&result).map_err(ParleyError::storage)?;
        let ttl = chrono::Duration::from_std(self.marker_ttl).unwrap_or(chrono::Duration::days(7));
        self.storage
            .put_marker(MARKER_SCOPE, &message.id, &encoded, Utc::now() + ttl)
            .await?;
        Ok(result)
    }

    async fn evaluate(
        &self,
        guard: &ContextGuard<'_>,
        message: &Message,
        signals: &FlowSignals,
    ) -> Result<ExecutionResult, ParleyError> {
        let conversation_id = guard.conversation_id().to_string();

        let (flow, state, entry) = match guard.flow_state() {
            Some(state) => match self.storage.get_flow(&state.flow_id).await? {
                Some(flow) => (flow, state.clone(), Entry::Continue),
                None => {
                    let mut result = ExecutionResult::new(&message.id, ExecutionStatus::Stale);
                    result.flow_id = Some(state.flow_id.clone());
                    result.node_id = Some(state.current_node_id.clone());
                    result.detail = Some(format!("flow {} no longer exists", state.flow_id));
                    warn!(
                        conversation_id = conversation_id.as_str(),
                        flow_id = state.flow_id.as_str(),
                        "flow execution is stale"
                    );
                    return Ok(result);
                }
            },
            None => {
                let flows = self.storage.list_active_flows(&signals.tenant_id).await?;
                let picked = trigger::select(
                    &flows,
                    &TriggerSignals {
                        text: &message.content,
                        bot_id: signals.bot_id.as_deref(),
                        is_new_conversation: signals.is_new_conversation,
                        detected_intent: signals.detected_intent.as_deref(),
                    },
                );
                let Some(flow) = picked else {
                    return Ok(ExecutionResult::inactive(&message.id));
                };
                info!(
                    conversation_id = conversation_id.as_str(),
                    flow_id = flow.id.as_str(),
                    trigger = %flow.trigger,
                    "starting flow"
                );
                let state = FlowExecutionState::new(flow.id.clone(), flow.start_node_id.clone());
                (flow.clone(), state, Entry::Start)
            }
        };

        let step = machine::step(&flow, state, entry, &message.content, self.max_chained_nodes);
        let mut result = ExecutionResult::new(&message.id, step.status);
        result.flow_id = Some(flow.id.clone());
        result.node_id = Some(step.state.current_node_id.clone());
        result.detail = step.detail.clone();
        result.state_after = step.next_state();

        if step.status == ExecutionStatus::Stale {
            warn!(
                conversation_id = conversation_id.as_str(),
                flow_id = flow.id.as_str(),
                detail = step.detail.as_deref().unwrap_or_default(),
                "flow execution is stale"
            );
            return Ok(result);
        }

        let mut scratch = guard.context().variables.clone();
        for node in &step.visited {
            for action in &node.actions {
                let scope = ActionScope {
                    conversation_id: &conversation_id,
                    flow_vars: &step.state.variables,
                    scratch: &scratch,
                };
                let (outcome, effect) = self.actions.run(&scope, &node.id, action).await;
                result.actions.push(outcome);
                match effect {
                    Some(ActionEffect::SetVariable { key, value }) => {
                        scratch.insert(key.clone(), value.clone());
                        result.variables_set.insert(key, value);
                    }
                    Some(ActionEffect::Escalate { detail }) => {
                        result.escalation = Some(FlowEscalation {
                            node_id: node.id.clone(),
                            detail,
                        });
                    }
                    None => {}
                }
            }
        }

        if let Some(node) = step.landed() {
            let rendered = template::render(&node.content, &step.state.variables, &scratch);
            if !rendered.trim().is_empty() {
                result.content = Some(rendered);
            }
            result.quick_replies = node.quick_replies.clone();
        }

        match step.status {
            ExecutionStatus::Completed => info!(
                conversation_id = conversation_id.as_str(),
                flow_id = flow.id.as_str(),
                node_id = step.state.current_node_id.as_str(),
                "flow completed"
            ),
            _ => debug!(
                conversation_id = conversation_id.as_str(),
                flow_id = flow.id.as_str(),
                node_id = step.state.current_node_id.as_str(),
                status = step.status.as_str(),
                "flow advanced"
            ),
        }
        Ok(result)
    }
}

fn apply(guard: &mut ContextGuard<'_>, result: &ExecutionResult) {
    for (key, value) in &result.variables_set {
        guard.set_variable(key.clone(), value.clone());
    }
    match (&result.state_after, result.status) {
        (Some(state), _) => guard.set_flow_state(state.clone()),
        (None, ExecutionStatus::Inactive) => {}
        (None, _) => {
            guard.clear_flow_state();
        }
    }
}
