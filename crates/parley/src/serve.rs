// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve`: runs the routing pipeline until a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use parley_bus::Bus;
use parley_config::ParleyConfig;
use parley_core::{ParleyError, StorageAdapter};
use parley_pipeline::{install_signal_handler, Pipeline};
use parley_storage::SqliteStorage;
use tracing::{info, warn};

pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    init_tracing(&config.service.log_level);
    info!(
        service = config.service.name.as_str(),
        database = config.storage.database_path.as_str(),
        "starting parley"
    );

    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;
    let bus = Bus::open(storage.database()?).await?;

    #[cfg(feature = "prometheus")]
    let metrics = if config.prometheus.enabled {
        match parley_prometheus::PrometheusAdapter::new() {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!(error = %e, "metrics disabled");
                None
            }
        }
    } else {
        None
    };

    let grace = Duration::from_secs(config.shutdown.grace_period_secs);
    let pipeline = Pipeline::builder(config, storage.clone(), bus).build().await?;
    if pipeline.channels().is_empty() {
        warn!("no channel adapters registered, only bus traffic will be processed");
    }

    let shutdown = install_signal_handler();
    let running = pipeline.start(&shutdown).await?;
    info!(
        channels = pipeline.channels().len(),
        "parley running, waiting for shutdown signal"
    );

    shutdown.cancelled().await;
    info!(grace_secs = grace.as_secs(), "draining pipeline");
    running.drain(grace).await;

    #[cfg(feature = "prometheus")]
    if let Some(metrics) = metrics {
        tracing::debug!(snapshot = %metrics.render(), "final metrics");
    }

    storage.close().await?;
    info!("parley stopped");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
