// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter registry, delivery workers and receive loops.
//!
//! Adapters are registered once at startup, keyed by channel type. Each
//! registered type gets an outbound delivery consumer and a receive loop
//! feeding [`Ingestor`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parley_bus::{Bus, Delivery, MessageHandler, PublishOptions};
use parley_core::envelope::{subjects, OutboundMessage, StatusUpdate};
use parley_core::types::MessageStatus;
use parley_core::{ChannelAdapter, HealthStatus, ParleyError, StorageAdapter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::Ingestor;
use crate::metrics;

pub type SharedChannel = Arc<dyn ChannelAdapter + Send + Sync>;

/// Durable consumer name of the delivery worker for `channel_type`.
pub fn consumer_name(channel_type: &str) -> String {
    format!("outbound-{channel_type}")
}

#[derive(Default)]
pub struct ChannelRegistry {
    adapters: BTreeMap<String, SharedChannel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its channel type. A second adapter for the
    /// same type is a configuration error.
    pub fn register(&mut self, adapter: SharedChannel) -> Result<(), ParleyError> {
        let channel_type = adapter.channel_type().to_string();
        if self.adapters.contains_key(&channel_type) {
            return Err(ParleyError::Config(format!(
                "channel type `{channel_type}` registered twice"
            )));
        }
        info!(channel_type = channel_type.as_str(), adapter = adapter.name(), "channel adapter registered");
        self.adapters.insert(channel_type, adapter);
        Ok(())
    }

    pub fn get(&self, channel_type: &str) -> Result<SharedChannel, ParleyError> {
        self.adapters
            .get(channel_type)
            .cloned()
            .ok_or_else(|| ParleyError::AdapterNotFound {
                adapter_type: "Channel".into(),
                name: channel_type.to_string(),
            })
    }

    pub fn channel_types(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Health of every adapter. A failing check reports as unhealthy.
    pub async fn health(&self) -> Vec<(String, HealthStatus)> {
        let mut report = Vec::with_capacity(self.adapters.len());
        for (channel_type, adapter) in &self.adapters {
            let status = adapter
                .health_check()
                .await
                .unwrap_or_else(|e| HealthStatus::Unhealthy(e.to_string()));
            report.push((channel_type.clone(), status));
        }
        report
    }

    pub async fn shutdown(&self) {
        for (channel_type, adapter) in &self.adapters {
            if let Err(e) = adapter.shutdown().await {
                warn!(channel_type = channel_type.as_str(), error = %e, "channel adapter shutdown failed");
            }
        }
    }
}

/// Sends queued outbound messages through one channel adapter and reports
/// the result as a status update.
pub struct DeliveryWorker {
    adapter: SharedChannel,
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
    consumer: String,
}

impl DeliveryWorker {
    pub fn new(adapter: SharedChannel, storage: Arc<dyn StorageAdapter + Send + Sync>, bus: Bus) -> Self {
        let consumer = consumer_name(adapter.channel_type());
        Self {
            adapter,
            storage,
            bus,
            consumer,
        }
    }

    async fn report(
        &self,
        outbound: &OutboundMessage,
        status: MessageStatus,
        external_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), ParleyError> {
        let update = StatusUpdate {
            message_id: outbound.message_id.clone(),
            status,
            external_id,
            error,
            timestamp: Utc::now(),
        };
        self.bus
            .publish_json(
                &subjects::status(&outbound.channel_type),
                &update,
                PublishOptions::default()
                    .msg_id(format!("{}:{status}", outbound.message_id))
                    .partition_key(outbound.conversation_id.clone()),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for DeliveryWorker {
    async fn handle(&self, delivery: Delivery) -> Result<(), ParleyError> {
        if delivery.attempt > 1 {
            metrics::redelivery(&self.consumer);
        }
        let outbound: OutboundMessage = match delivery.json() {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!(consumer = self.consumer.as_str(), seq = delivery.seq, error = %e, "malformed outbound message dropped");
                return Ok(());
            }
        };

        if let Some(stored) = self.storage.get_message(&outbound.message_id).await?
            && stored.status != MessageStatus::Pending
        {
            debug!(
                message_id = outbound.message_id.as_str(),
                status = %stored.status,
                "outbound message already handled"
            );
            return Ok(());
        }

        match self.adapter.send(outbound.clone()).await {
            Ok(external_id) => {
                debug!(
                    conversation_id = outbound.conversation_id.as_str(),
                    message_id = outbound.message_id.as_str(),
                    external_id = external_id.as_str(),
                    "outbound message sent"
                );
                self.report(&outbound, MessageStatus::Sent, Some(external_id), None)
                    .await
            }
            Err(e) if delivery.is_last_attempt() => {
                warn!(
                    conversation_id = outbound.conversation_id.as_str(),
                    message_id = outbound.message_id.as_str(),
                    attempt = delivery.attempt,
                    error = %e,
                    "outbound delivery failed for good"
                );
                self.report(&outbound, MessageStatus::Failed, None, Some(e.to_string()))
                    .await
            }
            Err(e) => {
                warn!(
                    message_id = outbound.message_id.as_str(),
                    attempt = delivery.attempt,
                    max_deliver = delivery.max_deliver,
                    error = %e,
                    "outbound delivery failed, will retry"
                );
                Err(e)
            }
        }
    }
}

/// Pulls inbound events from `adapter` into the ingestor until `shutdown`.
pub fn spawn_receiver(
    adapter: SharedChannel,
    ingestor: Arc<Ingestor>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let channel_type = adapter.channel_type().to_string();
        debug!(channel_type = channel_type.as_str(), "receive loop started");
        loop {
            let payload = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = adapter.receive() => received,
            };
            match payload {
                Ok(payload) => {
                    if let Err(e) = ingestor.normalize_and_ingest(payload).await {
                        warn!(channel_type = channel_type.as_str(), error = %e, "inbound event rejected");
                    }
                }
                Err(e) => {
                    warn!(channel_type = channel_type.as_str(), error = %e, "channel receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!(channel_type = channel_type.as_str(), "receive loop stopped");
    })
}
