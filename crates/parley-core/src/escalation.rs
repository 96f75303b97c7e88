// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Escalation reasons and the record handed to human agents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{Message, Priority};

/// Why a conversation left automated handling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    LowConfidence,
    Sentiment,
    Keyword,
    Intent,
    UserRequest,
    OutsideHours,
    Misconfigured,
    StaleFlow,
    FlowAction,
    AiTimeout,
    AiFailure,
    InvalidPayload,
}

impl EscalationReason {
    /// Queue priority for the human agent.
    pub fn priority(self) -> Priority {
        match self {
            EscalationReason::Sentiment | EscalationReason::AiFailure => Priority::High,
            EscalationReason::LowConfidence => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

/// Snapshot of the flow at escalation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub flow_id: String,
    pub node_id: String,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// Everything a human agent needs to pick the conversation up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: String,
    pub conversation_id: String,
    /// Inbound message that triggered the escalation.
    pub message_id: String,
    pub reason: EscalationReason,
    #[serde(default)]
    pub detail: Option<String>,
    pub priority: Priority,
    #[serde(default)]
    pub recent_messages: Vec<Message>,
    #[serde(default)]
    pub flow: Option<FlowSnapshot>,
    #[serde(default)]
    pub ai_confidence: Option<f32>,
    #[serde(default)]
    pub detected_intent: Option<String>,
    #[serde(default)]
    pub detected_sentiment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_are_snake_case() {
        assert_eq!(EscalationReason::StaleFlow.to_string(), "stale_flow");
        assert_eq!(EscalationReason::LowConfidence.to_string(), "low_confidence");
        assert_eq!(
            "outside_hours".parse::<EscalationReason>().unwrap(),
            EscalationReason::OutsideHours
        );
    }

    #[test]
    fn priority_follows_reason() {
        assert_eq!(EscalationReason::Sentiment.priority(), Priority::High);
        assert_eq!(EscalationReason::LowConfidence.priority(), Priority::Low);
        assert_eq!(EscalationReason::UserRequest.priority(), Priority::Normal);
        assert_eq!(EscalationReason::StaleFlow.priority(), Priority::Normal);
    }
}
