// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite database settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Durable message bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Conversation context store settings.
    #[serde(default)]
    pub context: ContextConfig,

    /// Flow engine settings.
    #[serde(default)]
    pub flow: FlowConfig,

    /// Decision orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Idempotency marker settings.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Graceful shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Identifies this process in logs. Generated when absent.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            instance_id: None,
        }
    }
}

fn default_service_name() -> String {
    "parley".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_true() -> bool {
    true
}

/// Stream limits and consumer tuning for the durable bus.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Retention of the messages stream, in seconds.
    #[serde(default = "default_messages_max_age")]
    pub messages_max_age_secs: u64,

    /// Retention of the events stream, in seconds.
    #[serde(default = "default_events_max_age")]
    pub events_max_age_secs: u64,

    /// Largest accepted payload in bytes.
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,

    /// Window during which a repeated message id is discarded.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: u64,

    /// Deliveries pulled per fetch.
    #[serde(default = "default_fetch_batch")]
    pub fetch_batch: usize,

    /// Idle wait between empty fetches, in milliseconds.
    #[serde(default = "default_fetch_wait")]
    pub fetch_wait_ms: u64,

    /// Base redelivery delay after a handler error. Multiplied by the attempt number.
    #[serde(default = "default_nak_delay")]
    pub nak_delay_ms: u64,

    /// Worker tasks per consumer.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_inbound_max_deliver")]
    pub inbound_max_deliver: u32,

    #[serde(default = "default_inbound_ack_wait")]
    pub inbound_ack_wait_secs: u64,

    #[serde(default = "default_outbound_max_deliver")]
    pub outbound_max_deliver: u32,

    #[serde(default = "default_outbound_ack_wait")]
    pub outbound_ack_wait_secs: u64,

    #[serde(default = "default_status_max_deliver")]
    pub status_max_deliver: u32,

    #[serde(default = "default_status_ack_wait")]
    pub status_ack_wait_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            messages_max_age_secs: default_messages_max_age(),
            events_max_age_secs: default_events_max_age(),
            max_msg_size: default_max_msg_size(),
            duplicate_window_secs: default_duplicate_window(),
            fetch_batch: default_fetch_batch(),
            fetch_wait_ms: default_fetch_wait(),
            nak_delay_ms: default_nak_delay(),
            workers: default_workers(),
            inbound_max_deliver: default_inbound_max_deliver(),
            inbound_ack_wait_secs: default_inbound_ack_wait(),
            outbound_max_deliver: default_outbound_max_deliver(),
            outbound_ack_wait_secs: default_outbound_ack_wait(),
            status_max_deliver: default_status_max_deliver(),
            status_ack_wait_secs: default_status_ack_wait(),
        }
    }
}

fn default_messages_max_age() -> u64 {
    7 * 24 * 60 * 60
}

fn default_events_max_age() -> u64 {
    24 * 60 * 60
}

fn default_max_msg_size() -> usize {
    4 * 1024 * 1024
}

fn default_duplicate_window() -> u64 {
    300
}

fn default_fetch_batch() -> usize {
    10
}

fn default_fetch_wait() -> u64 {
    500
}

fn default_nak_delay() -> u64 {
    5000
}

fn default_workers() -> usize {
    8
}

fn default_inbound_max_deliver() -> u32 {
    5
}

fn default_inbound_ack_wait() -> u64 {
    30
}

fn default_outbound_max_deliver() -> u32 {
    5
}

fn default_outbound_ack_wait() -> u64 {
    60
}

fn default_status_max_deliver() -> u32 {
    3
}

fn default_status_ack_wait() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Messages kept in the rolling history.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Contexts idle longer than this are evicted.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// Interval of the background maintenance sweep.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            idle_ttl_secs: default_idle_ttl(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

fn default_history_window() -> usize {
    20
}

fn default_idle_ttl() -> u64 {
    24 * 60 * 60
}

fn default_gc_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowConfig {
    /// Attempts per action before its outcome is recorded as failed.
    #[serde(default = "default_action_max_attempts")]
    pub action_max_attempts: u32,

    /// Initial backoff between action attempts; doubles per attempt.
    #[serde(default = "default_action_backoff")]
    pub action_backoff_ms: u64,

    /// Bound on condition nodes chained within one advance.
    #[serde(default = "default_max_chained_nodes")]
    pub max_chained_nodes: usize,

    /// Timeout of `http_call` actions.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            action_max_attempts: default_action_max_attempts(),
            action_backoff_ms: default_action_backoff(),
            max_chained_nodes: default_max_chained_nodes(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_action_max_attempts() -> u32 {
    3
}

fn default_action_backoff() -> u64 {
    200
}

fn default_max_chained_nodes() -> usize {
    16
}

fn default_http_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// AI calls exceeding this escalate with `ai_timeout`.
    #[serde(default = "default_ai_timeout")]
    pub ai_timeout_secs: u64,

    /// Concurrent AI calls allowed per tenant.
    #[serde(default = "default_tenant_ai_concurrency")]
    pub tenant_ai_concurrency: usize,

    /// Messages attached to an escalation record.
    #[serde(default = "default_escalation_history")]
    pub escalation_history: usize,

    /// Knowledge snippets used to ground AI replies.
    #[serde(default = "default_knowledge_top_k")]
    pub knowledge_top_k: usize,

    /// Acknowledgement sent on escalation when the bot has none.
    #[serde(default = "default_escalation_message")]
    pub escalation_message: String,

    /// Threshold for `low_confidence` rules without a value.
    #[serde(default = "default_confidence_threshold")]
    pub default_confidence_threshold: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ai_timeout_secs: default_ai_timeout(),
            tenant_ai_concurrency: default_tenant_ai_concurrency(),
            escalation_history: default_escalation_history(),
            knowledge_top_k: default_knowledge_top_k(),
            escalation_message: default_escalation_message(),
            default_confidence_threshold: default_confidence_threshold(),
        }
    }
}

fn default_ai_timeout() -> u64 {
    30
}

fn default_tenant_ai_concurrency() -> usize {
    4
}

fn default_escalation_history() -> usize {
    20
}

fn default_knowledge_top_k() -> usize {
    3
}

fn default_escalation_message() -> String {
    "Thanks for your patience. A member of our team will be with you shortly.".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Lifetime of processed-message markers.
    #[serde(default = "default_marker_ttl")]
    pub marker_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            marker_ttl_secs: default_marker_ttl(),
        }
    }
}

fn default_marker_ttl() -> u64 {
    7 * 24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Time in-flight handlers get to finish after a shutdown signal.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
        }
    }
}

fn default_grace_period() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
