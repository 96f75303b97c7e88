// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for the Parley routing core.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. The rendered
//! text format is available through [`PrometheusAdapter::render`].

pub mod recording;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use parley_core::{AdapterType, HealthStatus, ParleyError, PluginAdapter};

pub use recording::{
    record_ai_latency, record_decision, record_escalation, record_flow_action, record_inbound,
    record_outbound, record_redelivery, record_status_update, register_metrics,
};

/// Installs the Prometheus recorder and keeps its handle for rendering.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Installs the recorder globally. Only one recorder can be installed
    /// per process; a second call returns an error.
    pub fn new() -> Result<Self, ParleyError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ParleyError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Wraps a handle from a recorder built elsewhere, e.g. a local one in tests.
    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[async_trait]
impl PluginAdapter for PrometheusAdapter {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Observability
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders_recorded_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let adapter = PrometheusAdapter::from_handle(recorder.handle());

        metrics::with_local_recorder(&recorder, || {
            record_inbound("whatsapp");
            record_inbound("whatsapp");
            record_escalation("low_confidence");
            record_status_update("delivered", "applied");
        });

        let text = adapter.render();
        assert!(text.contains("parley_inbound_messages_total{channel_type=\"whatsapp\"} 2"));
        assert!(text.contains("parley_escalations_total{reason=\"low_confidence\"} 1"));
        assert!(text.contains("status=\"delivered\""));
    }

    #[tokio::test]
    async fn adapter_reports_observability_type() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let adapter = PrometheusAdapter::from_handle(recorder.handle());
        assert_eq!(adapter.name(), "prometheus");
        assert_eq!(adapter.adapter_type(), AdapterType::Observability);
        assert_eq!(adapter.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}
