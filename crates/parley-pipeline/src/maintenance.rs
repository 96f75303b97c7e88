// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic housekeeping: idle contexts, expired markers, aged bus messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_bus::Bus;
use parley_context::ContextStore;
use parley_core::{ParleyError, StorageAdapter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub contexts: usize,
    pub markers: u64,
    pub bus_messages: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.contexts == 0 && self.markers == 0 && self.bus_messages == 0
    }
}

pub async fn sweep_once(
    contexts: &ContextStore,
    storage: &(dyn StorageAdapter + Send + Sync),
    bus: &Bus,
) -> Result<SweepReport, ParleyError> {
    let now = Utc::now();
    let report = SweepReport {
        contexts: contexts.collect_garbage(now).await?,
        markers: storage.purge_markers(now).await?,
        bus_messages: bus.purge_expired().await?,
    };
    if report.is_empty() {
        debug!("maintenance sweep found nothing to remove");
    } else {
        info!(
            contexts = report.contexts,
            markers = report.markers,
            bus_messages = report.bus_messages,
            "maintenance sweep completed"
        );
    }
    Ok(report)
}

/// Runs [`sweep_once`] every `interval` until `shutdown`.
pub fn spawn_sweeper(
    contexts: Arc<ContextStore>,
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    bus: Bus,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = sweep_once(&contexts, storage.as_ref(), &bus).await {
                        warn!(error = %e, "maintenance sweep failed");
                    }
                }
            }
        }
        debug!("maintenance loop stopped");
    })
}
