// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring of the pipeline components and their bus consumers.

use std::sync::Arc;
use std::time::Duration;

use parley_bus::{Bus, ConsumerConfig, MessageHandler, Subscription};
use parley_config::model::ParleyConfig;
use parley_context::ContextStore;
use parley_core::envelope::subjects;
use parley_core::{KnowledgeAdapter, ParleyError, ProviderAdapter, StorageAdapter};
use parley_flow::FlowEngine;
use parley_router::{AiResponder, EscalationService, Orchestrator};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channels::{self, ChannelRegistry, DeliveryWorker, SharedChannel};
use crate::dispatch::Dispatcher;
use crate::ingest::Ingestor;
use crate::maintenance;
use crate::processor::{self, InboundProcessor};
use crate::status::{self, StatusReconciler};

pub struct PipelineBuilder {
    config: ParleyConfig,
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
    channels: ChannelRegistry,
    responder: AiResponder,
}

impl PipelineBuilder {
    pub fn with_channel(mut self, adapter: SharedChannel) -> Result<Self, ParleyError> {
        self.channels.register(adapter)?;
        Ok(self)
    }

    /// Registers an AI provider under `name`, matched against a bot's provider.
    pub fn with_provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn ProviderAdapter + Send + Sync>,
    ) -> Self {
        self.responder = self.responder.with_provider(name, provider);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeAdapter + Send + Sync>) -> Self {
        self.responder = self.responder.with_knowledge(knowledge);
        self
    }

    /// Creates the default streams and assembles the components.
    pub async fn build(self) -> Result<Pipeline, ParleyError> {
        let PipelineBuilder {
            config,
            storage,
            bus,
            channels,
            responder,
        } = self;
        bus.ensure_default_streams(&config.bus).await?;

        let contexts = Arc::new(ContextStore::new(storage.clone(), &config.context));
        let flows = Arc::new(FlowEngine::new(
            storage.clone(),
            &config.flow,
            &config.idempotency,
        )?);
        let escalations = EscalationService::new(
            storage.clone(),
            bus.clone(),
            config.orchestrator.escalation_history,
        );
        let orchestrator = Arc::new(Orchestrator::new(
            storage.clone(),
            responder,
            escalations,
            &config.orchestrator,
            &config.idempotency,
        ));
        let dispatcher = Arc::new(Dispatcher::new(storage.clone(), bus.clone()));
        let ingestor = Arc::new(Ingestor::new(storage.clone(), bus.clone()));
        let processor = Arc::new(InboundProcessor::new(
            storage.clone(),
            bus.clone(),
            contexts.clone(),
            flows,
            orchestrator,
            dispatcher.clone(),
        ));
        let status = Arc::new(StatusReconciler::new(storage.clone(), bus.clone()));

        Ok(Pipeline {
            config,
            storage,
            bus,
            channels: Arc::new(channels),
            contexts,
            ingestor,
            processor,
            dispatcher,
            status,
        })
    }
}

/// The assembled routing pipeline.
pub struct Pipeline {
    config: ParleyConfig,
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
    channels: Arc<ChannelRegistry>,
    contexts: Arc<ContextStore>,
    ingestor: Arc<Ingestor>,
    processor: Arc<InboundProcessor>,
    dispatcher: Arc<Dispatcher>,
    status: Arc<StatusReconciler>,
}

impl Pipeline {
    pub fn builder(
        config: ParleyConfig,
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        bus: Bus,
    ) -> PipelineBuilder {
        let responder = AiResponder::new(&config.orchestrator);
        PipelineBuilder {
            config,
            storage,
            bus,
            channels: ChannelRegistry::new(),
            responder,
        }
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter + Send + Sync> {
        &self.storage
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn processor(&self) -> &Arc<InboundProcessor> {
        &self.processor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> &Arc<StatusReconciler> {
        &self.status
    }

    pub fn inbound_consumer(&self) -> ConsumerConfig {
        let bus = &self.config.bus;
        ConsumerConfig::new(
            processor::CONSUMER,
            subjects::INBOUND_ALL,
            bus.inbound_max_deliver,
            Duration::from_secs(bus.inbound_ack_wait_secs),
            bus,
        )
    }

    pub fn status_consumer(&self) -> ConsumerConfig {
        let bus = &self.config.bus;
        ConsumerConfig::new(
            status::CONSUMER,
            subjects::STATUS_ALL,
            bus.status_max_deliver,
            Duration::from_secs(bus.status_ack_wait_secs),
            bus,
        )
    }

    pub fn outbound_consumer(&self, channel_type: &str) -> ConsumerConfig {
        let bus = &self.config.bus;
        ConsumerConfig::new(
            channels::consumer_name(channel_type),
            subjects::outbound(channel_type),
            bus.outbound_max_deliver,
            Duration::from_secs(bus.outbound_ack_wait_secs),
            bus,
        )
    }

    /// Registers every durable consumer without starting them.
    pub async fn register_consumers(&self) -> Result<(), ParleyError> {
        self.bus.add_consumer(&self.inbound_consumer()).await?;
        self.bus.add_consumer(&self.status_consumer()).await?;
        for channel_type in self.channels.channel_types() {
            self.bus
                .add_consumer(&self.outbound_consumer(channel_type))
                .await?;
        }
        Ok(())
    }

    /// Starts the consumers, channel receive loops and the maintenance loop.
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<RunningPipeline, ParleyError> {
        let token = shutdown.child_token();
        let mut subscriptions = Vec::new();

        let inbound: Arc<dyn MessageHandler> = self.processor.clone();
        subscriptions.push(
            self.bus
                .subscribe(self.inbound_consumer(), inbound, &token)
                .await?,
        );
        let status: Arc<dyn MessageHandler> = self.status.clone();
        subscriptions.push(
            self.bus
                .subscribe(self.status_consumer(), status, &token)
                .await?,
        );

        let mut tasks = Vec::new();
        for channel_type in self.channels.channel_types() {
            let adapter = self.channels.get(channel_type)?;
            let worker: Arc<dyn MessageHandler> = Arc::new(DeliveryWorker::new(
                adapter.clone(),
                self.storage.clone(),
                self.bus.clone(),
            ));
            subscriptions.push(
                self.bus
                    .subscribe(self.outbound_consumer(channel_type), worker, &token)
                    .await?,
            );
            tasks.push(channels::spawn_receiver(
                adapter,
                self.ingestor.clone(),
                token.clone(),
            ));
        }

        tasks.push(maintenance::spawn_sweeper(
            self.contexts.clone(),
            self.storage.clone(),
            self.bus.clone(),
            Duration::from_secs(self.config.context.gc_interval_secs),
            token.clone(),
        ));

        info!(
            consumers = subscriptions.len(),
            channels = self.channels.len(),
            "pipeline started"
        );
        Ok(RunningPipeline {
            token,
            subscriptions,
            tasks,
            channels: self.channels.clone(),
        })
    }
}

/// Handles to a started pipeline.
pub struct RunningPipeline {
    token: CancellationToken,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
    channels: Arc<ChannelRegistry>,
}

impl RunningPipeline {
    /// Stops pulling new work and waits up to `grace` for in-flight handlers.
    /// Unacked deliveries are redelivered on the next start.
    pub async fn drain(self, grace: Duration) {
        info!(grace_secs = grace.as_secs(), "draining pipeline");
        self.token.cancel();
        futures::future::join_all(self.subscriptions.into_iter().map(|s| s.drain(grace))).await;
        for task in self.tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "pipeline task ended abnormally");
            }
        }
        self.channels.shutdown().await;
        info!("pipeline stopped");
    }
}
