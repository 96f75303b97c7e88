// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery status reconciliation.
//!
//! Channel callbacks arrive out of order and more than once. Storage applies
//! them under the forward-only rule; anything it refuses is logged and
//! dropped.

use std::sync::Arc;

use async_trait::async_trait;
use parley_bus::{Bus, Delivery, MessageHandler};
use parley_core::envelope::{events, BusEvent, StatusUpdate};
use parley_core::traits::storage::StatusChange;
use parley_core::{ParleyError, StorageAdapter};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::metrics;

/// Durable consumer name of the status reconciler.
pub const CONSUMER: &str = "status-processor";

pub struct StatusReconciler {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
}

impl StatusReconciler {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>, bus: Bus) -> Self {
        Self { storage, bus }
    }

    /// Applies one callback and publishes `message.<status>` when it moved
    /// the message forward.
    pub async fn apply(&self, update: &StatusUpdate) -> Result<StatusChange, ParleyError> {
        let change = self.storage.update_message_status(update).await?;
        let status = update.status.to_string();
        match change {
            StatusChange::Applied { from, to } => {
                metrics::status_update(&status, "applied");
                debug!(
                    message_id = update.message_id.as_str(),
                    from = %from,
                    to = %to,
                    "message status updated"
                );
                if let Some(event_type) = events::for_status(to) {
                    let conversation_id = self
                        .storage
                        .get_message(&update.message_id)
                        .await?
                        .map(|m| m.conversation_id);
                    let mut event = BusEvent::new(event_type)
                        .message(update.message_id.clone())
                        .data(json!({
                            "from": from,
                            "to": to,
                            "external_id": update.external_id,
                            "error": update.error,
                        }));
                    if let Some(conversation_id) = conversation_id {
                        event = event.conversation(conversation_id);
                    }
                    self.bus
                        .publish_event(&event, Some(&update.message_id))
                        .await?;
                }
                if to == parley_core::MessageStatus::Failed {
                    info!(
                        message_id = update.message_id.as_str(),
                        error = update.error.as_deref().unwrap_or_default(),
                        "outbound message failed"
                    );
                }
            }
            StatusChange::Ignored { current } if current == update.status => {
                metrics::status_update(&status, "ignored");
                debug!(
                    message_id = update.message_id.as_str(),
                    status = %current,
                    "repeated status update dropped"
                );
            }
            StatusChange::Ignored { current } => {
                metrics::status_update(&status, "ignored");
                warn!(
                    message_id = update.message_id.as_str(),
                    current = %current,
                    requested = %update.status,
                    "status update would move backward, dropped"
                );
            }
            StatusChange::Unknown => {
                metrics::status_update(&status, "unknown");
                warn!(
                    message_id = update.message_id.as_str(),
                    status = %update.status,
                    "status update for unknown message dropped"
                );
            }
        }
        Ok(change)
    }
}

#[async_trait]
impl MessageHandler for StatusReconciler {
    async fn handle(&self, delivery: Delivery) -> Result<(), ParleyError> {
        if delivery.attempt > 1 {
            metrics::redelivery(CONSUMER);
        }
        let update: StatusUpdate = match delivery.json() {
            Ok(update) => update,
            Err(e) => {
                warn!(seq = delivery.seq, subject = delivery.subject.as_str(), error = %e, "malformed status update dropped");
                return Ok(());
            }
        };
        self.apply(&update).await.map(|_| ())
    }
}
