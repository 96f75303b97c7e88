// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the adapters, the pipeline and storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter in the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Provider,
    Knowledge,
    Storage,
    Bus,
    Observability,
}

/// Delivery status of a message.
///
/// Outbound messages move forward along `pending -> sent -> delivered -> read`
/// and may drop to `failed` from any non-terminal state. Inbound messages go
/// from `pending` straight to `received`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Received,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Received | MessageStatus::Failed => 4,
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Read | MessageStatus::Failed | MessageStatus::Received
        )
    }

    /// Returns true if moving from `self` to `next` respects the forward-only rule.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        match next {
            MessageStatus::Failed => true,
            MessageStatus::Received => self == MessageStatus::Pending,
            MessageStatus::Pending => false,
            _ => next.rank() > self.rank(),
        }
    }
}

/// Who authored a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Contact,
    Bot,
    User,
    System,
}

/// Canonical content type of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Contact,
    Template,
    Interactive,
}

/// A file or media reference attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attachment {
    /// Generated on ingest when the adapter leaves it empty.
    #[serde(default)]
    pub id: String,
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
}

/// A persisted chat message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub content_type: ContentType,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub attachments: Vec<Attachment>,
    pub status: MessageStatus,
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Returns true if the message was authored by the customer.
    pub fn is_from_contact(&self) -> bool {
        self.sender_type == SenderType::Contact
    }
}

/// Lifecycle status of a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Pending,
    Escalated,
    Resolved,
    Closed,
}

impl ConversationStatus {
    /// Open conversations keep receiving messages; resolved and closed ones do not.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            ConversationStatus::Open | ConversationStatus::Pending | ConversationStatus::Escalated
        )
    }
}

/// Handling priority of a conversation or escalation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// A conversation thread between one contact and one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub contact_id: String,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub assigned_user_id: Option<String>,
    pub tags: Vec<String>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Returns true while the bot (flow or AI) is allowed to answer.
    pub fn is_automated(&self) -> bool {
        matches!(
            self.status,
            ConversationStatus::Open | ConversationStatus::Pending
        ) && self.assigned_user_id.is_none()
    }
}

/// Static configuration of a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub tenant_id: String,
    /// Adapter family, e.g. `whatsapp` or `telegram`. Used in bus subjects.
    pub channel_type: String,
    pub name: String,
    pub enabled: bool,
}

/// Format used for every persisted timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Formats a timestamp the way storage persists it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a timestamp written by [`format_timestamp`] (or any RFC 3339 string).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [MessageStatus; 6] = [
        MessageStatus::Pending,
        MessageStatus::Received,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
        MessageStatus::Failed,
    ];

    #[test]
    fn forward_path_is_allowed() {
        assert!(MessageStatus::Pending.can_transition_to(MessageStatus::Sent));
        assert!(MessageStatus::Sent.can_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Delivered.can_transition_to(MessageStatus::Read));
        assert!(MessageStatus::Pending.can_transition_to(MessageStatus::Delivered));
    }

    #[test]
    fn backward_and_terminal_moves_are_rejected() {
        assert!(!MessageStatus::Delivered.can_transition_to(MessageStatus::Sent));
        assert!(!MessageStatus::Read.can_transition_to(MessageStatus::Failed));
        assert!(!MessageStatus::Failed.can_transition_to(MessageStatus::Sent));
        assert!(!MessageStatus::Sent.can_transition_to(MessageStatus::Pending));
        assert!(!MessageStatus::Sent.can_transition_to(MessageStatus::Sent));
    }

    #[test]
    fn failed_reachable_from_any_non_terminal() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
        ] {
            assert!(status.can_transition_to(MessageStatus::Failed), "{status}");
        }
    }

    #[test]
    fn received_only_from_pending() {
        assert!(MessageStatus::Pending.can_transition_to(MessageStatus::Received));
        assert!(!MessageStatus::Sent.can_transition_to(MessageStatus::Received));
    }

    #[test]
    fn status_string_round_trip() {
        use std::str::FromStr;
        for status in ALL {
            let s = status.to_string();
            assert_eq!(MessageStatus::from_str(&s).unwrap(), status);
        }
        assert_eq!(MessageStatus::Delivered.to_string(), "delivered");
    }

    #[test]
    fn conversation_automation_stops_after_escalation() {
        let now = Utc::now();
        let mut conv = Conversation {
            id: "c1".into(),
            tenant_id: "t1".into(),
            channel_id: "ch1".into(),
            contact_id: "u1".into(),
            status: ConversationStatus::Open,
            priority: Priority::Normal,
            assigned_user_id: None,
            tags: vec![],
            escalated_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(conv.is_automated());
        conv.status = ConversationStatus::Escalated;
        assert!(!conv.is_automated());
        assert!(conv.status.is_open());
    }

    #[test]
    fn timestamp_format_parses_back() {
        let now = Utc::now();
        let formatted = format_timestamp(&now);
        let parsed = parse_timestamp(&formatted).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    fn status_strategy() -> impl Strategy<Value = MessageStatus> {
        prop::sample::select(ALL.to_vec())
    }

    proptest! {
        /// Applying any callback sequence through the transition guard never
        /// moves an outbound message backwards.
        #[test]
        fn applied_transitions_are_monotonic(updates in prop::collection::vec(status_strategy(), 0..32)) {
            let mut current = MessageStatus::Pending;
            let mut history = vec![current];
            for next in updates {
                if next == MessageStatus::Received {
                    continue;
                }
                if current.can_transition_to(next) {
                    current = next;
                    history.push(current);
                }
            }
            for pair in history.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                prop_assert!(b == MessageStatus::Failed || b.rank() > a.rank());
                prop_assert!(!a.is_terminal());
            }
        }
    }
}
