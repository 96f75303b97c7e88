// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-message response decision.
//!
//! Exactly one response path fires for each inbound message: the flow's
//! output, an AI reply, or an escalation to a human. Decision-level failures
//! never leave this module as errors; they become an escalation. Only
//! storage and bus failures propagate, so the inbound delivery is retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_config::model::{IdempotencyConfig, OrchestratorConfig};
use parley_context::ConversationContext;
use parley_core::bot::Bot;
use parley_core::escalation::FlowSnapshot;
use parley_core::flow::QuickReply;
use parley_core::types::{Conversation, Message};
use parley_core::{EscalationReason, EscalationRecord, ParleyError, StorageAdapter};
use parley_flow::ExecutionResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ai::{AiError, AiResponder};
use crate::analysis::{Analysis, MessageAnalyzer, INTENT_METADATA_KEY};
use crate::escalation::{EscalationRequest, EscalationService};
use crate::hours;
use crate::rules::{self, RuleInput};

/// Marker scope for per-message decisions.
pub const MARKER_SCOPE: &str = "decide";

/// The single response path chosen for an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum ResponsePlan {
    UseFlowOutput {
        content: String,
        #[serde(default)]
        quick_replies: Vec<QuickReply>,
    },
    InvokeAi {
        response: String,
        confidence: f32,
    },
    Escalate {
        reason: EscalationReason,
        #[serde(default)]
        detail: Option<String>,
    },
}

impl ResponsePlan {
    pub fn name(&self) -> &'static str {
        match self {
            ResponsePlan::UseFlowOutput { .. } => "use_flow_output",
            ResponsePlan::InvokeAi { .. } => "invoke_ai",
            ResponsePlan::Escalate { .. } => "escalate",
        }
    }

    pub fn escalation_reason(&self) -> Option<EscalationReason> {
        match self {
            ResponsePlan::Escalate { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    fn escalate(reason: EscalationReason, detail: impl Into<String>) -> Self {
        ResponsePlan::Escalate {
            reason,
            detail: Some(detail.into()),
        }
    }
}

/// Inputs for one decision. The caller holds the conversation lock.
pub struct DecisionInput<'a> {
    pub conversation: &'a Conversation,
    pub message: &'a Message,
    pub context: &'a ConversationContext,
    /// Bot bound to the conversation's channel.
    pub bot: Option<&'a Bot>,
    pub flow: Option<&'a ExecutionResult>,
}

/// Outcome of [`Orchestrator::decide`], stored per message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub message_id: String,
    pub plan: ResponsePlan,
    pub analysis: Analysis,
    #[serde(default)]
    pub escalation: Option<EscalationRecord>,
    #[serde(default)]
    pub ai_confidence: Option<f32>,
    #[serde(default)]
    pub ai_latency_ms: Option<u64>,
    /// True when this decision came from the idempotency marker.
    #[serde(skip)]
    pub replayed: bool,
}

impl Decision {
    pub fn is_escalation(&self) -> bool {
        matches!(self.plan, ResponsePlan::Escalate { .. })
    }
}

pub struct Orchestrator {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    responder: AiResponder,
    escalations: EscalationService,
    analyzer: MessageAnalyzer,
    default_threshold: f32,
    escalation_message: String,
    marker_ttl: Duration,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        responder: AiResponder,
        escalations: EscalationService,
        config: &OrchestratorConfig,
        idempotency: &IdempotencyConfig,
    ) -> Self {
        Self {
            storage,
            responder,
            escalations,
            analyzer: MessageAnalyzer::new(),
            default_threshold: config.default_confidence_threshold,
            escalation_message: config.escalation_message.clone(),
            marker_ttl: Duration::from_secs(idempotency.marker_ttl_secs),
        }
    }

    /// Acknowledgment sent to the customer when a conversation escalates.
    pub fn escalation_message(&self, bot: Option<&Bot>) -> String {
        bot.and_then(|b| b.config.escalation_message.clone())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.escalation_message.clone())
    }

    /// Previously computed decision for `message_id`, if any.
    pub async fn replay(&self, message_id: &str) -> Result<Option<Decision>, ParleyError> {
        let Some(raw) = self.storage.get_marker(MARKER_SCOPE, message_id).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Decision>(&raw) {
            Ok(mut decision) => {
                decision.replayed = true;
                Ok(Some(decision))
            }
            Err(e) => {
                warn!(message_id, error = %e, "unreadable decision marker, deciding again");
                Ok(None)
            }
        }
    }

    /// Chooses the response path for `input.message`.
    ///
    /// A repeat call for the same message id returns the stored decision. An
    /// escalation is applied again on replay, which storage absorbs.
    pub async fn decide(&self, input: DecisionInput<'_>) -> Result<Decision, ParleyError> {
        if let Some(decision) = self.replay(&input.message.id).await? {
            debug!(
                conversation_id = input.conversation.id.as_str(),
                message_id = input.message.id.as_str(),
                plan = decision.plan.name(),
                "replaying decision"
            );
            if let Some(record) = &decision.escalation {
                self.escalations.escalate(record).await?;
            }
            return Ok(decision);
        }

        let mut decision = self.evaluate(&input, Utc::now()).await;
        if let ResponsePlan::Escalate { reason, detail } = &decision.plan {
            decision.escalation = Some(self.escalations.record(EscalationRequest {
                conversation: input.conversation,
                message: input.message,
                reason: *reason,
                detail: detail.clone(),
                context: input.context,
                flow: flow_snapshot(input.flow),
                ai_confidence: decision.ai_confidence,
                analysis: Some(&decision.analysis),
            }));
        }

        let encoded = serde_json::to_string(&decision).map_err(ParleyError::storage)?;
        let ttl = chrono::Duration::from_std(self.marker_ttl).unwrap_or(chrono::Duration::days(7));
        self.storage
            .put_marker(MARKER_SCOPE, &input.message.id, &encoded, Utc::now() + ttl)
            .await?;

        if let Some(record) = &decision.escalation {
            self.escalations.escalate(record).await?;
        }

        info!(
            conversation_id = input.conversation.id.as_str(),
            message_id = input.message.id.as_str(),
            plan = decision.plan.name(),
            reason = decision.plan.escalation_reason().map(|r| r.to_string()).unwrap_or_default(),
            "response decided"
        );
        Ok(decision)
    }

    /// Pure decision logic. Never fails; problems become an escalation.
    async fn evaluate(&self, input: &DecisionInput<'_>, now: DateTime<Utc>) -> Decision {
        let message = input.message;
        let analysis = self.analyzer.analyze(&message.content, &message.metadata);
        let mut ai = AiFacts::default();
        let plan = self.choose(input, &analysis, now, &mut ai).await;
        Decision {
            message_id: message.id.clone(),
            plan,
            analysis,
            escalation: None,
            ai_confidence: ai.confidence,
            ai_latency_ms: ai.latency_ms,
            replayed: false,
        }
    }

    async fn choose(
        &self,
        input: &DecisionInput<'_>,
        analysis: &Analysis,
        now: DateTime<Utc>,
        ai: &mut AiFacts,
    ) -> ResponsePlan {
        let message = input.message;
        let rule_set = input
            .bot
            .map(|b| b.config.escalation_rules.as_slice())
            .unwrap_or_default();
        let threshold = input
            .bot
            .and_then(|b| b.config.confidence_threshold)
            .unwrap_or(self.default_threshold);

        if let Some(flow) = input.flow {
            if flow.is_stale() {
                return ResponsePlan::escalate(
                    EscalationReason::StaleFlow,
                    flow.detail.clone().unwrap_or_else(|| "flow state is stale".into()),
                );
            }
            if let Some(requested) = &flow.escalation {
                return ResponsePlan::escalate(
                    EscalationReason::FlowAction,
                    requested
                        .detail
                        .clone()
                        .unwrap_or_else(|| format!("escalate action on node {}", requested.node_id)),
                );
            }
            if flow.produced_output()
                && let Some(content) = &flow.content
            {
                let hit = rules::evaluate(
                    rule_set,
                    &RuleInput {
                        text: &message.content,
                        analysis,
                        confidence: None,
                    },
                    threshold,
                );
                return match hit {
                    Some(hit) => ResponsePlan::escalate(hit.reason, hit.detail),
                    None => ResponsePlan::UseFlowOutput {
                        content: content.clone(),
                        quick_replies: flow.quick_replies.clone(),
                    },
                };
            }
        }

        let Some(bot) = input.bot.filter(|b| b.is_active()) else {
            return ResponsePlan::escalate(
                EscalationReason::Misconfigured,
                format!("no active bot bound to channel {}", input.conversation.channel_id),
            );
        };

        if let Some(hours) = &bot.config.working_hours {
            match hours::is_open(hours, now) {
                Ok(true) => {}
                Ok(false) => {
                    return ResponsePlan::escalate(
                        EscalationReason::OutsideHours,
                        "outside working hours",
                    );
                }
                Err(e) => return ResponsePlan::escalate(EscalationReason::Misconfigured, e.to_string()),
            }
        }

        let reply = match self
            .responder
            .generate(&input.conversation.tenant_id, bot, input.context, message)
            .await
        {
            Ok(reply) => reply,
            Err(AiError::Misconfigured(detail)) => {
                return ResponsePlan::escalate(EscalationReason::Misconfigured, detail);
            }
            Err(AiError::Timeout(after)) => {
                return ResponsePlan::escalate(
                    EscalationReason::AiTimeout,
                    format!("no AI reply within {}s", after.as_secs()),
                );
            }
            Err(AiError::Failed(e)) => {
                return ResponsePlan::escalate(EscalationReason::AiFailure, e.to_string());
            }
        };
        ai.confidence = Some(reply.confidence);
        ai.latency_ms = Some(reply.latency.as_millis() as u64);

        if reply.text.trim().is_empty() {
            return ResponsePlan::escalate(EscalationReason::AiFailure, "empty AI reply");
        }

        let hit = rules::evaluate(
            rule_set,
            &RuleInput {
                text: &message.content,
                analysis,
                confidence: Some(reply.confidence),
            },
            threshold,
        );
        match hit {
            Some(hit) => ResponsePlan::escalate(hit.reason, hit.detail),
            None => ResponsePlan::InvokeAi {
                response: reply.text,
                confidence: reply.confidence,
            },
        }
    }
}

#[derive(Default)]
struct AiFacts {
    confidence: Option<f32>,
    latency_ms: Option<u64>,
}

fn flow_snapshot(flow: Option<&ExecutionResult>) -> Option<FlowSnapshot> {
    let flow = flow?;
    let flow_id = flow.flow_id.clone()?;
    Some(FlowSnapshot {
        flow_id,
        node_id: flow.node_id.clone().unwrap_or_default(),
        variables: flow
            .state_after
            .as_ref()
            .map(|s| s.variables.clone())
            .unwrap_or_default(),
    })
}

/// Upstream intent for flow triggering, taken from message metadata.
pub fn detected_intent(message: &Message) -> Option<String> {
    message
        .metadata
        .get(INTENT_METADATA_KEY)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
