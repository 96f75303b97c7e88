// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payloads exchanged with channel adapters and carried on the bus.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Attachment, ContentType, Message, MessageStatus};

/// Raw inbound event as reported by a channel adapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub channel_id: String,
    /// Stable id of the physical event upstream; used for dedup.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Channel-specific content type label, e.g. `ptt` or `image/jpeg`.
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Published on `parley.messages.inbound.<channel_type>` after ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub tenant_id: String,
    pub channel_id: String,
    pub channel_type: String,
    pub is_new_conversation: bool,
    pub message: Message,
}

/// Published on `parley.messages.outbound.<channel_type>` for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub channel_id: String,
    pub channel_type: String,
    /// Contact the adapter delivers to.
    pub recipient_id: String,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Delivery status reported back by a channel adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Notification published on `parley.events.<event_type>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_type: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            conversation_id: None,
            message_id: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn message(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Bus subject names.
/// Lifecycle event types published on `parley.events.*`.
pub mod events {
    pub const MESSAGE_RECEIVED: &str = "message.received";
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const MESSAGE_DELIVERED: &str = "message.delivered";
    pub const MESSAGE_READ: &str = "message.read";
    pub const MESSAGE_FAILED: &str = "message.failed";
    pub const CONVERSATION_CREATED: &str = "conversation.created";
    pub const CONVERSATION_ESCALATED: &str = "conversation.escalated";
    pub const FLOW_COMPLETED: &str = "flow.completed";

    /// Event type for an applied status transition, if it has one.
    pub fn for_status(status: crate::types::MessageStatus) -> Option<&'static str> {
        use crate::types::MessageStatus;
        match status {
            MessageStatus::Sent => Some(MESSAGE_SENT),
            MessageStatus::Delivered => Some(MESSAGE_DELIVERED),
            MessageStatus::Read => Some(MESSAGE_READ),
            MessageStatus::Failed => Some(MESSAGE_FAILED),
            _ => None,
        }
    }
}

pub mod subjects {
    pub const MESSAGES_STREAM: &str = "PARLEY_MESSAGES";
    pub const EVENTS_STREAM: &str = "PARLEY_EVENTS";
    pub const MESSAGES_ALL: &str = "parley.messages.>";
    pub const EVENTS_ALL: &str = "parley.events.>";
    pub const INBOUND_ALL: &str = "parley.messages.inbound.>";
    pub const STATUS_ALL: &str = "parley.messages.status.>";

    pub fn inbound(channel_type: &str) -> String {
        format!("parley.messages.inbound.{channel_type}")
    }

    pub fn outbound(channel_type: &str) -> String {
        format!("parley.messages.outbound.{channel_type}")
    }

    pub fn status(channel_type: &str) -> String {
        format!("parley.messages.status.{channel_type}")
    }

    pub fn event(event_type: &str) -> String {
        format!("parley.events.{event_type}")
    }
}
