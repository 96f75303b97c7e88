// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NormalizeAndIngest: the entry point for channel adapters.

use std::sync::Arc;

use chrono::Utc;
use parley_bus::{Bus, PublishOptions};
use parley_core::envelope::{events, subjects, BusEvent, ChannelPayload, InboundEnvelope};
use parley_core::types::{ChannelConfig, Conversation, ConversationStatus, Message, Priority};
use parley_core::{ParleyError, StorageAdapter};
use serde_json::json;
use tracing::{debug, info};

use crate::metrics;
use crate::normalize::normalize;

pub struct Ingestor {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
}

impl Ingestor {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>, bus: Bus) -> Self {
        Self { storage, bus }
    }

    /// Normalizes, persists and publishes one inbound channel event.
    ///
    /// Idempotent on `(channel_id, external_id)`: a repeat returns the stored
    /// message and republishes it under the same bus message id, which the
    /// broker's duplicate window absorbs.
    pub async fn normalize_and_ingest(&self, payload: ChannelPayload) -> Result<Message, ParleyError> {
        let channel = self.channel(&payload.channel_id).await?;
        let normalized = normalize(payload)?;

        if let Some(existing) = self
            .storage
            .find_message_by_external_id(&channel.id, &normalized.external_id)
            .await?
        {
            return self.replay_duplicate(&channel, existing).await;
        }

        let (conversation, created) = self
            .find_or_create_conversation(&channel, &normalized.sender_id)
            .await?;
        let candidate =
            normalized.into_message(uuid::Uuid::new_v4().to_string(), conversation.id.clone());
        let (message, inserted) = self.storage.insert_inbound_message(&candidate).await?;
        if !inserted {
            // A concurrent delivery of the same event stored it first.
            return self.replay_duplicate(&channel, message).await;
        }

        if created {
            let event = BusEvent::new(events::CONVERSATION_CREATED)
                .conversation(conversation.id.clone())
                .data(json!({
                    "tenant_id": conversation.tenant_id,
                    "channel_id": conversation.channel_id,
                    "contact_id": conversation.contact_id,
                }));
            self.bus.publish_event(&event, Some(&conversation.id)).await?;
        }
        let event = BusEvent::new(events::MESSAGE_RECEIVED)
            .conversation(conversation.id.clone())
            .message(message.id.clone())
            .data(json!({
                "channel_id": channel.id,
                "content_type": message.content_type,
                "external_id": message.external_id,
            }));
        self.bus.publish_event(&event, Some(&message.id)).await?;
        self.publish_inbound(&channel, &message, created).await?;

        metrics::inbound(&channel.channel_type);
        debug!(
            conversation_id = conversation.id.as_str(),
            message_id = message.id.as_str(),
            channel_type = channel.channel_type.as_str(),
            "inbound message ingested"
        );
        Ok(message)
    }

    /// Republishes an already stored message under its original bus id.
    async fn replay_duplicate(
        &self,
        channel: &ChannelConfig,
        existing: Message,
    ) -> Result<Message, ParleyError> {
        let first = self.is_first_message(&existing).await?;
        self.publish_inbound(channel, &existing, first).await?;
        debug!(
            conversation_id = existing.conversation_id.as_str(),
            message_id = existing.id.as_str(),
            external_id = existing.external_id.as_deref().unwrap_or_default(),
            "duplicate inbound event"
        );
        Ok(existing)
    }

    async fn channel(&self, channel_id: &str) -> Result<ChannelConfig, ParleyError> {
        let channel = self
            .storage
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| ParleyError::Config(format!("channel {channel_id} is not configured")))?;
        if !channel.enabled {
            return Err(ParleyError::Config(format!("channel {channel_id} is disabled")));
        }
        Ok(channel)
    }

    async fn find_or_create_conversation(
        &self,
        channel: &ChannelConfig,
        contact_id: &str,
    ) -> Result<(Conversation, bool), ParleyError> {
        if let Some(existing) = self
            .storage
            .find_open_conversation(&channel.tenant_id, &channel.id, contact_id)
            .await?
        {
            return Ok((existing, false));
        }
        let now = Utc::now();
        let candidate = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: channel.tenant_id.clone(),
            channel_id: channel.id.clone(),
            contact_id: contact_id.to_string(),
            status: ConversationStatus::Open,
            priority: Priority::Normal,
            assigned_user_id: None,
            tags: Vec::new(),
            escalated_at: None,
            created_at: now,
            updated_at: now,
        };
        let (conversation, created) = self.storage.open_conversation(&candidate).await?;
        if !created {
            return Ok((conversation, false));
        }
        info!(
            conversation_id = conversation.id.as_str(),
            channel_id = channel.id.as_str(),
            "conversation created"
        );
        Ok((conversation, true))
    }

    /// True if `message` opened its conversation.
    async fn is_first_message(&self, message: &Message) -> Result<bool, ParleyError> {
        let earliest = self.storage.list_messages(&message.conversation_id, usize::MAX).await?;
        Ok(earliest.first().is_none_or(|m| m.id == message.id))
    }

    async fn publish_inbound(
        &self,
        channel: &ChannelConfig,
        message: &Message,
        is_new_conversation: bool,
    ) -> Result<(), ParleyError> {
        let envelope = InboundEnvelope {
            tenant_id: channel.tenant_id.clone(),
            channel_id: channel.id.clone(),
            channel_type: channel.channel_type.clone(),
            is_new_conversation,
            message: message.clone(),
        };
        self.bus
            .publish_json(
                &subjects::inbound(&channel.channel_type),
                &envelope,
                PublishOptions::default()
                    .msg_id(message.id.clone())
                    .partition_key(message.conversation_id.clone()),
            )
            .await?;
        Ok(())
    }
}
