// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound processing: one decision and at most one reply per message.
//!
//! Everything between loading the context and saving it runs under the
//! conversation's lock, so messages of one conversation are applied one at
//! a time and in order. Flow results and decisions are stored per message
//! id before their effects are persisted, so a redelivery replays them.

use std::sync::Arc;

use async_trait::async_trait;
use parley_bus::{Bus, Delivery, MessageHandler};
use parley_context::ContextStore;
use parley_core::envelope::{events, BusEvent, InboundEnvelope};
use parley_core::types::{Message, SenderType};
use parley_core::{ErrorClass, ParleyError, StorageAdapter};
use parley_flow::{ExecutionResult, FlowEngine, FlowSignals};
use parley_router::{detected_intent, Decision, DecisionInput, Orchestrator, ResponsePlan};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::dispatch::{Dispatcher, SendRequest};
use crate::metrics;

/// Durable consumer name of the inbound processor.
pub const CONSUMER: &str = "inbound-processor";

/// Metadata key carrying a reply's quick replies as JSON.
pub const QUICK_REPLIES_KEY: &str = "quick_replies";
/// Metadata key carrying the escalation reason on an acknowledgment.
pub const ESCALATION_REASON_KEY: &str = "escalation_reason";

/// What processing one inbound message did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The conversation is with a human; the message was only recorded.
    Recorded,
    /// A reply was queued: the bot's answer or an escalation acknowledgment.
    Replied { decision: Decision, reply: Message },
}

pub struct InboundProcessor {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
    contexts: Arc<ContextStore>,
    flows: Arc<FlowEngine>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<Dispatcher>,
}

impl InboundProcessor {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        bus: Bus,
        contexts: Arc<ContextStore>,
        flows: Arc<FlowEngine>,
        orchestrator: Arc<Orchestrator>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            storage,
            bus,
            contexts,
            flows,
            orchestrator,
            dispatcher,
        }
    }

    pub async fn process(&self, envelope: &InboundEnvelope) -> Result<ProcessOutcome, ParleyError> {
        let message = &envelope.message;
        let mut guard = self.contexts.lock(&message.conversation_id).await?;

        let conversation = self
            .storage
            .get_conversation(&message.conversation_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", &message.conversation_id))?;
        let decided_before = self.orchestrator.replay(&message.id).await?.is_some();
        guard.append_message(message.clone());

        if !decided_before && !conversation.is_automated() {
            guard.save().await?;
            debug!(
                conversation_id = conversation.id.as_str(),
                message_id = message.id.as_str(),
                status = %conversation.status,
                "conversation is with a human, message recorded"
            );
            return Ok(ProcessOutcome::Recorded);
        }

        let bot = self
            .storage
            .get_bot_for_channel(&conversation.channel_id)
            .await?;
        let signals = FlowSignals {
            tenant_id: conversation.tenant_id.clone(),
            bot_id: bot.as_ref().map(|b| b.id.clone()),
            is_new_conversation: envelope.is_new_conversation,
            detected_intent: detected_intent(message),
        };
        let flow = self.flows.advance(&mut guard, message, &signals).await?;

        let decision = self
            .orchestrator
            .decide(DecisionInput {
                conversation: &conversation,
                message,
                context: guard.context(),
                bot: bot.as_ref(),
                flow: Some(&flow),
            })
            .await?;

        let mut request = match &decision.plan {
            ResponsePlan::UseFlowOutput {
                content,
                quick_replies,
            } => {
                let mut request = SendRequest::text(&conversation.id, content, SenderType::Bot);
                if !quick_replies.is_empty() {
                    let encoded = serde_json::to_string(quick_replies)
                        .map_err(|e| ParleyError::Internal(format!("quick replies: {e}")))?;
                    request = request.metadata(QUICK_REPLIES_KEY, encoded);
                }
                request
            }
            ResponsePlan::InvokeAi { response, .. } => {
                SendRequest::text(&conversation.id, response, SenderType::Bot)
            }
            ResponsePlan::Escalate { reason, .. } => SendRequest::text(
                &conversation.id,
                self.orchestrator.escalation_message(bot.as_ref()),
                SenderType::System,
            )
            .metadata(ESCALATION_REASON_KEY, reason.to_string()),
        };
        if let Some(bot) = &bot {
            request = request.sender_id(bot.id.clone());
        }
        let reply = self
            .dispatcher
            .send(request.idempotency_key(reply_id(&message.id)))
            .await?;
        guard.append_message(reply.clone());

        if let Some(flow_id) = flow.completed_flow() {
            let event = BusEvent::new(events::FLOW_COMPLETED)
                .conversation(conversation.id.clone())
                .message(message.id.clone())
                .data(json!({
                    "flow_id": flow_id,
                    "node_id": flow.node_id,
                }));
            self.bus.publish_event(&event, Some(&message.id)).await?;
        }

        guard.save().await?;
        record_metrics(&flow, &decision);
        debug!(
            conversation_id = conversation.id.as_str(),
            message_id = message.id.as_str(),
            plan = decision.plan.name(),
            reply_id = reply.id.as_str(),
            replayed = decision.replayed,
            "inbound message processed"
        );
        Ok(ProcessOutcome::Replied { decision, reply })
    }
}

/// Id of the reply to an inbound message. Deterministic so a redelivered
/// message finds the reply it already produced.
pub fn reply_id(inbound_id: &str) -> String {
    format!("reply-{inbound_id}")
}

fn record_metrics(flow: &ExecutionResult, decision: &Decision) {
    if !flow.replayed {
        for outcome in &flow.actions {
            metrics::flow_action(&outcome.action.to_string(), outcome.succeeded);
        }
    }
    if decision.replayed {
        return;
    }
    metrics::decision(decision.plan.name());
    if let Some(reason) = decision.plan.escalation_reason() {
        metrics::escalation(&reason.to_string());
    }
    if let Some(ms) = decision.ai_latency_ms {
        metrics::ai_latency(ms as f64 / 1000.0);
    }
}

#[async_trait]
impl MessageHandler for InboundProcessor {
    async fn handle(&self, delivery: Delivery) -> Result<(), ParleyError> {
        if delivery.attempt > 1 {
            metrics::redelivery(CONSUMER);
        }
        let envelope: InboundEnvelope = match delivery.json() {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(seq = delivery.seq, subject = delivery.subject.as_str(), error = %e, "malformed inbound envelope dropped");
                return Ok(());
            }
        };
        match self.process(&envelope).await {
            Ok(_) => Ok(()),
            Err(e) if e.class() == ErrorClass::Transient => Err(e),
            Err(e) => {
                warn!(
                    conversation_id = envelope.message.conversation_id.as_str(),
                    message_id = envelope.message.id.as_str(),
                    error = %e,
                    "inbound message cannot be processed, dropped"
                );
                Ok(())
            }
        }
    }
}
