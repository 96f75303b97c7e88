// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable at-least-once message bus for the Parley routing core.
//!
//! Streams, consumer positions and delivery state live in the shared SQLite
//! database, so published messages and unacked deliveries survive restarts.
//! Delivery is at-least-once: handlers see a message again when they fail or
//! when their ack wait expires.

pub mod consumer;
pub mod stream;
pub mod subject;
pub mod subscription;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use parley_config::model::BusConfig;
use parley_core::envelope::{subjects, BusEvent};
use parley_core::{AdapterType, HealthStatus, ParleyError, PluginAdapter};
use parley_storage::Database;

pub use consumer::{ConsumerConfig, DeadLetter, Delivery, NakOutcome};
pub use stream::{PublishAck, PublishOptions, StreamConfig, StreamInfo};
pub use subscription::{MessageHandler, Subscription, handler_fn};

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert a tokio-rusqlite error into `ParleyError::Bus`.
pub(crate) fn map_bus_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> ParleyError {
    ParleyError::Bus {
        message: "bus storage failure".into(),
        source: Some(Box::new(e)),
    }
}

pub(crate) struct BusInner {
    db: Database,
    streams: DashMap<String, StreamConfig>,
    /// Wakes idle fetch loops after a publish or an ack.
    pub(crate) notify: Notify,
}

/// Handle to the durable bus. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    pub(crate) inner: Arc<BusInner>,
}

impl Bus {
    /// Opens the bus over `db`, loading previously provisioned streams.
    pub async fn open(db: Database) -> Result<Self, ParleyError> {
        let existing = stream::load_streams(&db).await?;
        let streams = DashMap::new();
        for config in existing {
            streams.insert(config.name.clone(), config);
        }
        debug!(streams = streams.len(), "bus opened");
        Ok(Self {
            inner: Arc::new(BusInner {
                db,
                streams,
                notify: Notify::new(),
            }),
        })
    }

    /// Creates the stream or updates its configuration. Safe to call on
    /// every start.
    pub async fn ensure_stream(&self, config: StreamConfig) -> Result<(), ParleyError> {
        if config.name.is_empty() || config.name.contains(['.', '*', '>', ' ']) {
            return Err(ParleyError::bus(format!(
                "invalid stream name `{}`",
                config.name
            )));
        }
        if config.subjects.is_empty() {
            return Err(ParleyError::bus(format!(
                "stream {} has no subjects",
                config.name
            )));
        }
        for pattern in &config.subjects {
            subject::validate_pattern(pattern)?;
            let clash = self.inner.streams.iter().find(|other| {
                other.name != config.name
                    && other.subjects.iter().any(|theirs| {
                        subject::covers(theirs, pattern) || subject::covers(pattern, theirs)
                    })
            });
            if let Some(other) = clash {
                return Err(ParleyError::bus(format!(
                    "subjects of stream {} overlap with stream {}",
                    config.name, other.name
                )));
            }
        }

        stream::upsert_stream(&self.inner.db, &config).await?;
        info!(
            stream = config.name.as_str(),
            subjects = ?config.subjects,
            max_age_secs = config.max_age.as_secs(),
            "stream ensured"
        );
        self.inner.streams.insert(config.name.clone(), config);
        Ok(())
    }

    /// Provisions `PARLEY_MESSAGES` and `PARLEY_EVENTS` from `[bus]`.
    pub async fn ensure_default_streams(&self, config: &BusConfig) -> Result<(), ParleyError> {
        let window = Duration::from_secs(config.duplicate_window_secs);
        self.ensure_stream(StreamConfig {
            name: subjects::MESSAGES_STREAM.into(),
            subjects: vec![subjects::MESSAGES_ALL.into()],
            max_age: Duration::from_secs(config.messages_max_age_secs),
            max_msg_size: config.max_msg_size,
            duplicate_window: window,
        })
        .await?;
        self.ensure_stream(StreamConfig {
            name: subjects::EVENTS_STREAM.into(),
            subjects: vec![subjects::EVENTS_ALL.into()],
            max_age: Duration::from_secs(config.events_max_age_secs),
            max_msg_size: config.max_msg_size,
            duplicate_window: window,
        })
        .await
    }

    fn stream_for(&self, subject: &str) -> Option<StreamConfig> {
        self.inner
            .streams
            .iter()
            .find(|s| s.covers_subject(subject))
            .map(|s| s.value().clone())
    }

    /// Durably appends `payload` to the stream that owns `subject`.
    pub async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<PublishAck, ParleyError> {
        subject::validate_subject(subject)?;
        let stream = self
            .stream_for(subject)
            .ok_or_else(|| ParleyError::bus(format!("no stream for subject `{subject}`")))?;
        if payload.len() > stream.max_msg_size {
            return Err(ParleyError::InvalidPayload(format!(
                "payload of {} bytes exceeds the {} byte limit of stream {}",
                payload.len(),
                stream.max_msg_size,
                stream.name
            )));
        }

        let ack = stream::append(&self.inner.db, &stream, subject, payload, options).await?;
        if ack.duplicate {
            debug!(subject, seq = ack.seq, "duplicate publish discarded");
        } else {
            self.inner.notify.notify_waiters();
        }
        Ok(ack)
    }

    /// Serializes `value` as JSON and publishes it.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        value: &T,
        options: PublishOptions,
    ) -> Result<PublishAck, ParleyError> {
        let payload = serde_json::to_vec(value).map_err(|e| ParleyError::Bus {
            message: format!("failed to encode payload for `{subject}`"),
            source: Some(Box::new(e)),
        })?;
        self.publish(subject, payload, options).await
    }

    /// Publishes a lifecycle event on `parley.events.<event_type>`.
    ///
    /// `dedup_key` makes republishing the same event harmless within the
    /// duplicate window.
    pub async fn publish_event(
        &self,
        event: &BusEvent,
        dedup_key: Option<&str>,
    ) -> Result<PublishAck, ParleyError> {
        let mut options = PublishOptions::default();
        if let Some(key) = dedup_key {
            options = options.msg_id(format!("{}:{key}", event.event_type));
        }
        if let Some(conversation_id) = &event.conversation_id {
            options = options.partition_key(conversation_id.clone());
        }
        self.publish_json(&subjects::event(&event.event_type), event, options)
            .await
    }

    /// Registers (or updates) a durable consumer. Its stream is the one
    /// whose subjects cover the filter.
    pub async fn add_consumer(&self, config: &ConsumerConfig) -> Result<(), ParleyError> {
        if config.durable.is_empty() {
            return Err(ParleyError::bus("durable consumer name is empty"));
        }
        if config.max_deliver == 0 {
            return Err(ParleyError::bus(format!(
                "consumer {} needs max_deliver >= 1",
                config.durable
            )));
        }
        subject::validate_pattern(&config.filter)?;
        let stream = self
            .inner
            .streams
            .iter()
            .find(|s| s.subjects.iter().any(|p| subject::covers(p, &config.filter)))
            .map(|s| s.name.clone())
            .ok_or_else(|| {
                ParleyError::bus(format!("no stream covers filter `{}`", config.filter))
            })?;
        consumer::register(&self.inner.db, &stream, config).await?;
        debug!(consumer = config.durable.as_str(), stream = stream.as_str(), "consumer registered");
        Ok(())
    }

    /// Registers the consumer and starts its fetch loop and workers.
    ///
    /// The subscription stops when `shutdown` is cancelled or when
    /// [`Subscription::drain`] is called.
    pub async fn subscribe(
        &self,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
        shutdown: &CancellationToken,
    ) -> Result<Subscription, ParleyError> {
        self.add_consumer(&config).await?;
        Ok(Subscription::start(self.clone(), config, handler, shutdown))
    }

    /// Claims up to `limit` ready deliveries. Used by the subscription loop
    /// and for manual pulls.
    pub async fn fetch(&self, consumer: &str, limit: usize) -> Result<Vec<Delivery>, ParleyError> {
        consumer::fetch(&self.inner.db, consumer, limit).await
    }

    /// Acknowledges a delivery. Returns false if it was no longer in flight.
    pub async fn ack(&self, consumer: &str, seq: u64) -> Result<bool, ParleyError> {
        let acked = consumer::ack(&self.inner.db, consumer, seq).await?;
        self.inner.notify.notify_waiters();
        Ok(acked)
    }

    /// Negatively acknowledges a delivery, scheduling a redelivery after
    /// `delay * attempt` or dead-lettering it on the final attempt.
    pub async fn nak(
        &self,
        consumer: &str,
        seq: u64,
        error: &str,
        delay: Duration,
    ) -> Result<NakOutcome, ParleyError> {
        consumer::nak(&self.inner.db, consumer, seq, error, delay).await
    }

    pub(crate) async fn release(&self, consumer: &str, seq: u64) -> Result<(), ParleyError> {
        consumer::release(&self.inner.db, consumer, seq).await
    }

    /// Deliveries that exhausted their attempts.
    pub async fn dead_letters(&self, consumer: &str) -> Result<Vec<DeadLetter>, ParleyError> {
        consumer::dead_letters(&self.inner.db, consumer).await
    }

    /// Messages the consumer has yet to ack or dead-letter.
    pub async fn outstanding(&self, consumer: &str) -> Result<u64, ParleyError> {
        consumer::outstanding(&self.inner.db, consumer).await
    }

    pub async fn stream_info(&self, name: &str) -> Result<StreamInfo, ParleyError> {
        if !self.inner.streams.contains_key(name) {
            return Err(ParleyError::not_found("stream", name));
        }
        stream::info(&self.inner.db, name).await
    }

    /// Removes messages past their stream's max age.
    pub async fn purge_expired(&self) -> Result<u64, ParleyError> {
        let removed = stream::purge_expired(&self.inner.db, now_ms()).await?;
        if removed > 0 {
            info!(removed, "purged expired bus messages");
        }
        Ok(removed)
    }
}

#[async_trait]
impl PluginAdapter for Bus {
    fn name(&self) -> &str {
        "sqlite-bus"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Bus
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        self.inner
            .db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1 FROM bus_streams LIMIT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_bus_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
