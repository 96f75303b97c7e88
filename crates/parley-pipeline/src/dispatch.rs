// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound dispatch.
//!
//! [`Dispatcher::send`] persists the message as `pending` and hands it to the
//! bus for the owning channel's delivery worker. It never waits for the
//! channel itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parley_bus::{Bus, PublishOptions};
use parley_core::envelope::{subjects, OutboundMessage, StatusUpdate};
use parley_core::types::{ContentType, Conversation, Message, MessageStatus, SenderType};
use parley_core::{ParleyError, StorageAdapter};
use tracing::{debug, warn};

use crate::metrics;

/// One message to send into a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub conversation_id: String,
    pub content: String,
    pub content_type: ContentType,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Becomes the message id. A repeat send with the same key returns the
    /// message created the first time.
    pub idempotency_key: Option<String>,
}

impl SendRequest {
    pub fn text(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        sender_type: SenderType,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            content_type: ContentType::Text,
            sender_type,
            sender_id: None,
            metadata: BTreeMap::new(),
            idempotency_key: None,
        }
    }

    pub fn sender_id(mut self, id: impl Into<String>) -> Self {
        self.sender_id = Some(id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

pub struct Dispatcher {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
}

impl Dispatcher {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>, bus: Bus) -> Self {
        Self { storage, bus }
    }

    /// Persists the message as `pending` and publishes it on the channel's
    /// outbound subject.
    ///
    /// If publishing fails the error is returned. A transient failure leaves
    /// the message `pending` so a retry with the same idempotency key
    /// publishes it again; any other failure marks it `failed`.
    pub async fn send(&self, request: SendRequest) -> Result<Message, ParleyError> {
        let conversation = self
            .storage
            .get_conversation(&request.conversation_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", &request.conversation_id))?;
        let channel = self
            .storage
            .get_channel(&conversation.channel_id)
            .await?
            .ok_or_else(|| {
                ParleyError::Config(format!(
                    "channel {} of conversation {} is not configured",
                    conversation.channel_id, conversation.id
                ))
            })?;

        if let Some(key) = &request.idempotency_key
            && let Some(existing) = self.storage.get_message(key).await?
        {
            debug!(
                conversation_id = conversation.id.as_str(),
                message_id = existing.id.as_str(),
                status = %existing.status,
                "outbound message already created"
            );
            if existing.status == MessageStatus::Pending {
                // The first publish may not have happened; the broker drops
                // the copy if it did.
                self.publish(&existing, &conversation, &channel.channel_type)
                    .await?;
            }
            return Ok(existing);
        }

        let message = Message {
            id: request
                .idempotency_key
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            conversation_id: conversation.id.clone(),
            sender_type: request.sender_type,
            sender_id: request.sender_id,
            content_type: request.content_type,
            content: request.content,
            metadata: request.metadata,
            attachments: Vec::new(),
            status: MessageStatus::Pending,
            external_id: None,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
        };
        self.storage.insert_message(&message).await?;

        if let Err(e) = self
            .publish(&message, &conversation, &channel.channel_type)
            .await
        {
            if e.is_transient() {
                warn!(
                    conversation_id = conversation.id.as_str(),
                    message_id = message.id.as_str(),
                    error = %e,
                    "outbound publish failed, message left pending for retry"
                );
                return Err(e);
            }
            warn!(
                conversation_id = conversation.id.as_str(),
                message_id = message.id.as_str(),
                error = %e,
                "outbound publish rejected, marking message failed"
            );
            let failed = StatusUpdate {
                message_id: message.id.clone(),
                status: MessageStatus::Failed,
                external_id: None,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
            };
            if let Err(mark) = self.storage.update_message_status(&failed).await {
                warn!(message_id = message.id.as_str(), error = %mark, "could not mark message failed");
            }
            return Err(e);
        }

        metrics::outbound(&channel.channel_type);
        debug!(
            conversation_id = conversation.id.as_str(),
            message_id = message.id.as_str(),
            channel_type = channel.channel_type.as_str(),
            "outbound message queued"
        );
        Ok(message)
    }

    async fn publish(
        &self,
        message: &Message,
        conversation: &Conversation,
        channel_type: &str,
    ) -> Result<(), ParleyError> {
        let outbound = OutboundMessage {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            channel_id: conversation.channel_id.clone(),
            channel_type: channel_type.to_string(),
            recipient_id: conversation.contact_id.clone(),
            content: message.content.clone(),
            content_type: message.content_type,
            metadata: message.metadata.clone(),
        };
        self.bus
            .publish_json(
                &subjects::outbound(channel_type),
                &outbound,
                PublishOptions::default()
                    .msg_id(message.id.clone())
                    .partition_key(message.conversation_id.clone()),
            )
            .await?;
        Ok(())
    }
}
