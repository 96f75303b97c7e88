// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end pipeline tests.
//!
//! `TestHarness` assembles the full pipeline over a temp SQLite database with
//! one mock channel, one bot and mock AI adapters. Bus consumers are pumped
//! by hand, so every test controls exactly when each stage runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_bus::{Bus, ConsumerConfig, MessageHandler};
use parley_config::model::{ParleyConfig, StorageConfig};
use parley_core::bot::{Bot, BotConfig, BotStatus};
use parley_core::envelope::ChannelPayload;
use parley_core::flow::Flow;
use parley_core::types::{ChannelConfig, Conversation, Message};
use parley_core::{ParleyError, StorageAdapter};
use parley_pipeline::{DeliveryWorker, Pipeline};
use parley_router::DEFAULT_PROVIDER;
use parley_storage::{Database, SqliteStorage};

use crate::mock_channel::MockChannel;
use crate::mock_knowledge::MockKnowledge;
use crate::mock_provider::MockProvider;

pub const TENANT_ID: &str = "tenant-1";
pub const CHANNEL_ID: &str = "channel-1";
pub const CHANNEL_TYPE: &str = "mock";
pub const BOT_ID: &str = "bot-1";

/// Rounds of pumping before `run_until_idle` gives up.
const MAX_ROUNDS: usize = 100;

pub struct TestHarnessBuilder {
    config: ParleyConfig,
    bot: Option<BotConfig>,
    provider: MockProvider,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = ParleyConfig::default();
        config.flow.action_backoff_ms = 1;
        config.bus.nak_delay_ms = 0;
        Self {
            config,
            bot: Some(BotConfig::default()),
            provider: MockProvider::new(),
        }
    }

    /// Adjusts the configuration before the pipeline is assembled.
    pub fn with_config(mut self, adjust: impl FnOnce(&mut ParleyConfig)) -> Self {
        adjust(&mut self.config);
        self
    }

    pub fn with_bot_config(mut self, config: BotConfig) -> Self {
        self.bot = Some(config);
        self
    }

    /// No bot is bound to the channel.
    pub fn without_bot(mut self) -> Self {
        self.bot = None;
        self
    }

    pub fn with_provider(mut self, provider: MockProvider) -> Self {
        self.provider = provider;
        self
    }

    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| ParleyError::Storage { source: e.into() })?;
        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: temp_dir.path().join("test.db").to_string_lossy().to_string(),
            wal_mode: true,
        };

        let sqlite = SqliteStorage::new(config.storage.clone());
        sqlite.initialize().await?;
        let database = sqlite.database()?;
        let bus = Bus::open(database.clone()).await?;
        let storage: Arc<dyn StorageAdapter + Send + Sync> = Arc::new(sqlite);

        storage
            .upsert_channel(&ChannelConfig {
                id: CHANNEL_ID.into(),
                tenant_id: TENANT_ID.into(),
                channel_type: CHANNEL_TYPE.into(),
                name: "Mock channel".into(),
                enabled: true,
            })
            .await?;
        if let Some(bot_config) = self.bot {
            upsert_bot(storage.as_ref(), bot_config).await?;
            storage.bind_bot_channel(BOT_ID, CHANNEL_ID).await?;
        }

        let channel = Arc::new(MockChannel::new(CHANNEL_TYPE));
        let provider = Arc::new(self.provider);
        let knowledge = Arc::new(MockKnowledge::new());

        let pipeline = Pipeline::builder(config.clone(), storage.clone(), bus.clone())
            .with_channel(channel.clone())?
            .with_provider(DEFAULT_PROVIDER, provider.clone())
            .with_knowledge(knowledge.clone())
            .build()
            .await?;
        pipeline.register_consumers().await?;
        let delivery = DeliveryWorker::new(channel.clone(), storage.clone(), bus.clone());

        Ok(TestHarness {
            config,
            storage,
            bus,
            pipeline,
            channel,
            provider,
            knowledge,
            delivery,
            database,
            _temp_dir: temp_dir,
        })
    }
}

async fn upsert_bot(storage: &(dyn StorageAdapter + Send + Sync), config: BotConfig) -> Result<(), ParleyError> {
    storage
        .upsert_bot(&Bot {
            id: BOT_ID.into(),
            tenant_id: TENANT_ID.into(),
            name: "Test bot".into(),
            status: BotStatus::Active,
            config,
        })
        .await
}

/// A complete pipeline over temp storage with mock adapters.
pub struct TestHarness {
    pub config: ParleyConfig,
    pub storage: Arc<dyn StorageAdapter + Send + Sync>,
    pub bus: Bus,
    pub pipeline: Pipeline,
    pub channel: Arc<MockChannel>,
    pub provider: Arc<MockProvider>,
    pub knowledge: Arc<MockKnowledge>,
    delivery: DeliveryWorker,
    database: Database,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with a default bot and a provider answering at confidence 0.9.
    pub async fn new() -> Result<Self, ParleyError> {
        Self::builder().build().await
    }

    /// A text event from `sender` on the harness channel.
    pub fn payload(&self, external_id: &str, sender: &str, text: &str) -> ChannelPayload {
        ChannelPayload {
            channel_id: CHANNEL_ID.into(),
            external_id: Some(external_id.into()),
            sender_id: Some(sender.into()),
            content_type: "text".into(),
            content: text.into(),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub async fn ingest(&self, payload: ChannelPayload) -> Result<Message, ParleyError> {
        self.pipeline.ingestor().normalize_and_ingest(payload).await
    }

    pub async fn send_text(
        &self,
        external_id: &str,
        sender: &str,
        text: &str,
    ) -> Result<Message, ParleyError> {
        self.ingest(self.payload(external_id, sender, text)).await
    }

    pub async fn pump_inbound(&self) -> Result<usize, ParleyError> {
        let consumer = self.pipeline.inbound_consumer();
        self.pump(&consumer, self.pipeline.processor().as_ref()).await
    }

    pub async fn pump_outbound(&self) -> Result<usize, ParleyError> {
        let consumer = self.pipeline.outbound_consumer(CHANNEL_TYPE);
        self.pump(&consumer, &self.delivery).await
    }

    pub async fn pump_status(&self) -> Result<usize, ParleyError> {
        let consumer = self.pipeline.status_consumer();
        self.pump(&consumer, self.pipeline.status().as_ref()).await
    }

    /// Pumps every consumer until none has work left.
    pub async fn run_until_idle(&self) -> Result<(), ParleyError> {
        for _ in 0..MAX_ROUNDS {
            let handled =
                self.pump_inbound().await? + self.pump_outbound().await? + self.pump_status().await?;
            if handled == 0 {
                return Ok(());
            }
        }
        Err(ParleyError::Internal(format!(
            "pipeline still busy after {MAX_ROUNDS} rounds"
        )))
    }

    /// One fetch of `consumer`, acking handled deliveries and naking failures.
    async fn pump(
        &self,
        consumer: &ConsumerConfig,
        handler: &dyn MessageHandler,
    ) -> Result<usize, ParleyError> {
        let deliveries = self
            .bus
            .fetch(&consumer.durable, consumer.fetch_batch.max(1))
            .await?;
        let handled = deliveries.len();
        for delivery in deliveries {
            let seq = delivery.seq;
            match handler.handle(delivery).await {
                Ok(()) => {
                    self.bus.ack(&consumer.durable, seq).await?;
                }
                Err(e) => {
                    self.bus
                        .nak(&consumer.durable, seq, &e.to_string(), Duration::ZERO)
                        .await?;
                }
            }
        }
        Ok(handled)
    }

    pub async fn set_bot_config(&self, config: BotConfig) -> Result<(), ParleyError> {
        upsert_bot(self.storage.as_ref(), config).await
    }

    pub async fn upsert_flow(&self, flow: &Flow) -> Result<(), ParleyError> {
        self.storage.upsert_flow(flow).await
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation, ParleyError> {
        self.storage
            .get_conversation(id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", id))
    }

    /// Makes every outbound publish fail at the bus table until turned off.
    pub async fn fail_outbound_publishes(&self, failing: bool) -> Result<(), ParleyError> {
        let sql = if failing {
            "CREATE TRIGGER IF NOT EXISTS fail_outbound_publish \
             BEFORE INSERT ON bus_messages \
             WHEN NEW.subject LIKE 'parley.messages.outbound.%' \
             BEGIN SELECT RAISE(ABORT, 'bus unavailable'); END;"
        } else {
            "DROP TRIGGER IF EXISTS fail_outbound_publish;"
        };
        self.database.execute_batch(sql).await
    }

    /// Messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ParleyError> {
        self.storage.list_messages(conversation_id, usize::MAX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_seeds_channel_and_bot() {
        let harness = TestHarness::new().await.unwrap();
        let channel = harness.storage.get_channel(CHANNEL_ID).await.unwrap().unwrap();
        assert_eq!(channel.channel_type, CHANNEL_TYPE);
        let bot = harness.storage.get_bot_for_channel(CHANNEL_ID).await.unwrap();
        assert_eq!(bot.map(|b| b.id), Some(BOT_ID.to_string()));
    }

    #[tokio::test]
    async fn harness_without_bot() {
        let harness = TestHarness::builder().without_bot().build().await.unwrap();
        assert!(harness.storage.get_bot_for_channel(CHANNEL_ID).await.unwrap().is_none());
    }
}
