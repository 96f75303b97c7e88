// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handover to a human agent.
//!
//! The escalation record and the conversation status change are written in
//! one storage transaction, so an escalated conversation always carries its
//! context. The notification event goes out afterwards.

use std::sync::Arc;

use chrono::Utc;
use parley_bus::Bus;
use parley_context::ConversationContext;
use parley_core::envelope::{events, BusEvent};
use parley_core::escalation::FlowSnapshot;
use parley_core::types::{Conversation, Message};
use parley_core::{EscalationReason, EscalationRecord, ParleyError, StorageAdapter};
use serde_json::json;
use tracing::{debug, info};

use crate::analysis::Analysis;

/// Inputs for one escalation record.
pub struct EscalationRequest<'a> {
    pub conversation: &'a Conversation,
    pub message: &'a Message,
    pub reason: EscalationReason,
    pub detail: Option<String>,
    pub context: &'a ConversationContext,
    pub flow: Option<FlowSnapshot>,
    pub ai_confidence: Option<f32>,
    pub analysis: Option<&'a Analysis>,
}

pub struct EscalationService {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
    history: usize,
}

impl EscalationService {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>, bus: Bus, history: usize) -> Self {
        Self {
            storage,
            bus,
            history,
        }
    }

    /// Builds the record. Its id derives from the message id, so the same
    /// inbound message never escalates twice.
    pub fn record(&self, request: EscalationRequest<'_>) -> EscalationRecord {
        let mut recent = request.context.recent(self.history);
        if !request.context.contains_message(&request.message.id) {
            recent.push(request.message.clone());
            if recent.len() > self.history {
                recent.remove(0);
            }
        }
        EscalationRecord {
            id: format!("esc-{}", request.message.id),
            conversation_id: request.conversation.id.clone(),
            message_id: request.message.id.clone(),
            reason: request.reason,
            detail: request.detail,
            priority: request.reason.priority(),
            recent_messages: recent,
            flow: request
                .flow
                .or_else(|| {
                    request.context.flow.as_ref().map(|state| FlowSnapshot {
                        flow_id: state.flow_id.clone(),
                        node_id: state.current_node_id.clone(),
                        variables: state.variables.clone(),
                    })
                }),
            ai_confidence: request.ai_confidence,
            detected_intent: request.analysis.and_then(|a| a.intent.clone()),
            detected_sentiment: request.analysis.map(|a| a.sentiment.to_string()),
            created_at: Utc::now(),
        }
    }

    /// Persists the record with the status change, then notifies.
    /// Returns false if this record was already applied.
    pub async fn escalate(&self, record: &EscalationRecord) -> Result<bool, ParleyError> {
        let applied = self.storage.escalate_conversation(record).await?;
        if applied {
            info!(
                conversation_id = record.conversation_id.as_str(),
                message_id = record.message_id.as_str(),
                reason = %record.reason,
                priority = %record.priority,
                "conversation escalated"
            );
        } else {
            debug!(
                conversation_id = record.conversation_id.as_str(),
                escalation_id = record.id.as_str(),
                "escalation already recorded"
            );
        }

        let event = BusEvent::new(events::CONVERSATION_ESCALATED)
            .conversation(record.conversation_id.clone())
            .message(record.message_id.clone())
            .data(json!({
                "escalation_id": record.id,
                "reason": record.reason,
                "detail": record.detail,
                "priority": record.priority,
                "ai_confidence": record.ai_confidence,
            }));
        self.bus.publish_event(&event, Some(&record.id)).await?;
        Ok(applied)
    }
}
