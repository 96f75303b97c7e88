// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade, so calls are no-ops until a recorder is
//! installed.

use metrics::{describe_counter, describe_histogram};

pub const INBOUND_MESSAGES: &str = "parley_inbound_messages_total";
pub const OUTBOUND_MESSAGES: &str = "parley_outbound_messages_total";
pub const DECISIONS: &str = "parley_decisions_total";
pub const ESCALATIONS: &str = "parley_escalations_total";
pub const FLOW_ACTIONS: &str = "parley_flow_actions_total";
pub const BUS_REDELIVERIES: &str = "parley_bus_redeliveries_total";
pub const AI_LATENCY: &str = "parley_ai_latency_seconds";
pub const STATUS_UPDATES: &str = "parley_status_updates_total";

/// Register all Parley metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(INBOUND_MESSAGES, "Inbound messages ingested");
    describe_counter!(OUTBOUND_MESSAGES, "Outbound messages queued for delivery");
    describe_counter!(DECISIONS, "Response decisions by plan");
    describe_counter!(ESCALATIONS, "Conversations escalated to a human, by reason");
    describe_counter!(FLOW_ACTIONS, "Flow node actions by outcome");
    describe_counter!(BUS_REDELIVERIES, "Bus deliveries seen more than once");
    describe_histogram!(AI_LATENCY, "AI provider reply latency in seconds");
    describe_counter!(STATUS_UPDATES, "Delivery status callbacks by outcome");
}

pub fn record_inbound(channel_type: &str) {
    metrics::counter!(INBOUND_MESSAGES, "channel_type" => channel_type.to_string()).increment(1);
}

pub fn record_outbound(channel_type: &str) {
    metrics::counter!(OUTBOUND_MESSAGES, "channel_type" => channel_type.to_string()).increment(1);
}

pub fn record_decision(plan: &'static str) {
    metrics::counter!(DECISIONS, "plan" => plan).increment(1);
}

pub fn record_escalation(reason: &str) {
    metrics::counter!(ESCALATIONS, "reason" => reason.to_string()).increment(1);
}

/// `outcome` is `ok` or `failed`.
pub fn record_flow_action(action: &str, outcome: &'static str) {
    metrics::counter!(FLOW_ACTIONS, "action" => action.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_redelivery(consumer: &str) {
    metrics::counter!(BUS_REDELIVERIES, "consumer" => consumer.to_string()).increment(1);
}

pub fn record_ai_latency(seconds: f64) {
    metrics::histogram!(AI_LATENCY).record(seconds);
}

/// `outcome` is `applied`, `ignored` or `unknown`.
pub fn record_status_update(status: &str, outcome: &'static str) {
    metrics::counter!(STATUS_UPDATES, "status" => status.to_string(), "outcome" => outcome)
        .increment(1);
}
