// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for the state the routing core owns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bot::Bot;
use crate::envelope::StatusUpdate;
use crate::error::ParleyError;
use crate::escalation::EscalationRecord;
use crate::flow::Flow;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ChannelConfig, Conversation, Message, MessageStatus};

/// Outcome of applying a status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The status moved forward.
    Applied {
        from: MessageStatus,
        to: MessageStatus,
    },
    /// Backward, repeated or post-terminal update; nothing changed.
    Ignored { current: MessageStatus },
    /// No message with that id.
    Unknown,
}

/// Serialized conversation context as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredContext {
    pub conversation_id: String,
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

/// Adapter for storage and persistence backends.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), ParleyError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), ParleyError>;

    // --- Conversations ---

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), ParleyError>;

    /// Stores `conversation` unless the contact already has an active one on
    /// the channel, which is returned instead. Atomic; the flag is true when
    /// `conversation` was stored.
    async fn open_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(Conversation, bool), ParleyError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, ParleyError>;

    /// Most recent open, pending or escalated conversation for a contact on a channel.
    async fn find_open_conversation(
        &self,
        tenant_id: &str,
        channel_id: &str,
        contact_id: &str,
    ) -> Result<Option<Conversation>, ParleyError>;

    async fn add_conversation_tag(&self, id: &str, tag: &str) -> Result<(), ParleyError>;

    async fn assign_conversation(&self, id: &str, user_id: &str) -> Result<(), ParleyError>;

    /// Marks the conversation escalated and stores the record atomically.
    ///
    /// Returns false when the conversation was already escalated by an
    /// earlier delivery of the same record.
    async fn escalate_conversation(&self, record: &EscalationRecord) -> Result<bool, ParleyError>;

    /// Latest escalation record of a conversation.
    async fn get_escalation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<EscalationRecord>, ParleyError>;

    // --- Messages ---

    async fn insert_message(&self, message: &Message) -> Result<(), ParleyError>;

    /// Stores an inbound message unless the same upstream event was already
    /// ingested on its channel. Atomic; returns the stored message and
    /// whether this call inserted it.
    async fn insert_inbound_message(&self, message: &Message) -> Result<(Message, bool), ParleyError>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>, ParleyError>;

    /// Inbound message previously ingested for an upstream event.
    async fn find_message_by_external_id(
        &self,
        channel_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, ParleyError>;

    /// Last `limit` messages of a conversation in chronological order.
    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ParleyError>;

    /// Applies a status callback under the forward-only rule.
    async fn update_message_status(
        &self,
        update: &StatusUpdate,
    ) -> Result<StatusChange, ParleyError>;

    // --- Definitions (read-mostly) ---

    async fn upsert_flow(&self, flow: &Flow) -> Result<(), ParleyError>;

    async fn get_flow(&self, id: &str) -> Result<Option<Flow>, ParleyError>;

    async fn list_active_flows(&self, tenant_id: &str) -> Result<Vec<Flow>, ParleyError>;

    async fn upsert_bot(&self, bot: &Bot) -> Result<(), ParleyError>;

    async fn get_bot(&self, id: &str) -> Result<Option<Bot>, ParleyError>;

    /// Bot bound to a channel, if any.
    async fn get_bot_for_channel(&self, channel_id: &str) -> Result<Option<Bot>, ParleyError>;

    async fn bind_bot_channel(&self, bot_id: &str, channel_id: &str) -> Result<(), ParleyError>;

    async fn upsert_channel(&self, channel: &ChannelConfig) -> Result<(), ParleyError>;

    async fn get_channel(&self, id: &str) -> Result<Option<ChannelConfig>, ParleyError>;

    // --- Conversation contexts ---

    async fn load_context(
        &self,
        conversation_id: &str,
    ) -> Result<Option<StoredContext>, ParleyError>;

    async fn save_context(&self, conversation_id: &str, data: &str) -> Result<(), ParleyError>;

    async fn delete_context(&self, conversation_id: &str) -> Result<(), ParleyError>;

    /// Ids of contexts not updated since `before`.
    async fn list_idle_contexts(&self, before: DateTime<Utc>) -> Result<Vec<String>, ParleyError>;

    // --- Idempotency markers ---

    async fn get_marker(&self, scope: &str, key: &str) -> Result<Option<String>, ParleyError>;

    /// Stores a marker unless one exists. Returns true if this call created it.
    async fn put_marker(
        &self,
        scope: &str,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ParleyError>;

    /// Removes markers that expired before `now`. Returns the number removed.
    async fn purge_markers(&self, now: DateTime<Utc>) -> Result<u64, ParleyError>;
}
