// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pull loop and worker pool behind a durable subscription.
//!
//! One fetch task claims batches and routes each delivery to a worker chosen
//! by hash of its partition key, so deliveries sharing a key run on the same
//! worker in sequence order. Handler success acks; failure naks.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_core::ParleyError;

use crate::Bus;
use crate::consumer::{ConsumerConfig, Delivery, NakOutcome};

/// Processes deliveries for a subscription.
///
/// Returning an error naks the delivery; it is redelivered after a backoff
/// until `max_deliver` attempts are used up. Handlers must therefore be
/// idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), ParleyError>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ParleyError>> + Send,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), ParleyError> {
        (self.0)(delivery).await
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ParleyError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Job {
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
}

/// A running durable subscription.
pub struct Subscription {
    name: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn start(
        bus: Bus,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
        shutdown: &CancellationToken,
    ) -> Self {
        let cancel = shutdown.child_token();
        let workers = config.workers.max(1);
        let capacity = config.fetch_batch.max(1) * workers;
        let permits = Arc::new(Semaphore::new(capacity));

        let mut senders = Vec::with_capacity(workers);
        let mut tasks = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel::<Job>(config.fetch_batch.max(1));
            senders.push(tx);
            tasks.push(tokio::spawn(run_worker(
                worker_id,
                bus.clone(),
                config.clone(),
                handler.clone(),
                rx,
                cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(run_fetcher(
            bus,
            config.clone(),
            senders,
            permits,
            cancel.clone(),
        )));

        info!(consumer = config.durable.as_str(), filter = config.filter.as_str(), workers, "subscription started");
        Self {
            name: config.durable,
            cancel,
            tasks,
        }
    }

    /// Durable consumer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops pulling and waits up to `grace` for in-flight handlers.
    ///
    /// Handlers still running at the deadline are aborted; their deliveries
    /// stay in flight and are redelivered once the ack wait expires.
    pub async fn drain(self, grace: Duration) {
        self.cancel.cancel();
        let aborts: Vec<AbortHandle> = self.tasks.iter().map(|t| t.abort_handle()).collect();
        match tokio::time::timeout(grace, futures::future::join_all(self.tasks)).await {
            Ok(_) => info!(consumer = self.name.as_str(), "subscription drained"),
            Err(_) => {
                warn!(
                    consumer = self.name.as_str(),
                    grace_secs = grace.as_secs_f64(),
                    "drain grace period elapsed, aborting remaining handlers"
                );
                for handle in aborts {
                    handle.abort();
                }
            }
        }
    }
}

/// Worker index for a delivery. Keyless deliveries spread by sequence.
pub(crate) fn worker_for(delivery: &Delivery, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    match delivery.partition_key.as_deref() {
        Some(key) => key.hash(&mut hasher),
        None => delivery.seq.hash(&mut hasher),
    }
    (hasher.finish() % workers as u64) as usize
}

async fn run_fetcher(
    bus: Bus,
    config: ConsumerConfig,
    senders: Vec<mpsc::Sender<Job>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let consumer = config.durable.as_str();
    let batch = config.fetch_batch.max(1);

    loop {
        // Wait for at least one free slot, then take what else is free.
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let mut slots = vec![first];
        while slots.len() < batch {
            match permits.clone().try_acquire_owned() {
                Ok(p) => slots.push(p),
                Err(_) => break,
            }
        }

        let notified = bus.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let deliveries = match bus.fetch(consumer, slots.len()).await {
            Ok(d) => d,
            Err(e) => {
                warn!(consumer, error = %e, "fetch failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.fetch_wait) => continue,
                }
            }
        };

        if deliveries.is_empty() {
            drop(slots);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut notified => {}
                _ = tokio::time::sleep(config.fetch_wait) => {}
            }
            continue;
        }

        debug!(consumer, count = deliveries.len(), "fetched deliveries");
        for delivery in deliveries {
            let Some(permit) = slots.pop() else {
                break;
            };
            let idx = worker_for(&delivery, senders.len());
            let seq = delivery.seq;
            if senders[idx]
                .send(Job {
                    delivery,
                    _permit: permit,
                })
                .await
                .is_err()
            {
                error!(consumer, seq, "worker channel closed");
                return;
            }
        }
    }
    debug!(consumer, "fetch loop stopped");
}

async fn run_worker(
    worker_id: usize,
    bus: Bus,
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
    mut rx: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) {
    let consumer = config.durable.as_str();
    while let Some(job) = rx.recv().await {
        let delivery = job.delivery;
        let seq = delivery.seq;

        if cancel.is_cancelled() {
            // Not started yet; hand it back without spending an attempt.
            if let Err(e) = bus.release(consumer, seq).await {
                warn!(consumer, seq, error = %e, "failed to release delivery");
            }
            continue;
        }

        let attempt = delivery.attempt;
        let subject = delivery.subject.clone();
        match handler.handle(delivery).await {
            Ok(()) => {
                if let Err(e) = bus.ack(consumer, seq).await {
                    warn!(consumer, seq, error = %e, "ack failed, delivery will be redelivered");
                }
            }
            Err(e) => match bus.nak(consumer, seq, &e.to_string(), config.nak_delay).await {
                Ok(NakOutcome::Redeliver(delay)) => warn!(
                    consumer,
                    seq,
                    subject = subject.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "handler failed, scheduling redelivery"
                ),
                Ok(NakOutcome::Dead) => warn!(
                    consumer,
                    seq,
                    subject = subject.as_str(),
                    attempt,
                    error = %e,
                    "handler failed on final attempt, delivery dead-lettered"
                ),
                Ok(NakOutcome::Gone) => debug!(consumer, seq, "nak for delivery no longer in flight"),
                Err(nak_err) => warn!(consumer, seq, error = %nak_err, "nak failed"),
            },
        }
    }
    debug!(consumer, worker_id, "worker stopped");
}
