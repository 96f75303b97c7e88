// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric hooks. Compiled to no-ops without the `prometheus` feature.

#[cfg(feature = "prometheus")]
mod imp {
    pub fn inbound(channel_type: &str) {
        parley_prometheus::record_inbound(channel_type);
    }

    pub fn outbound(channel_type: &str) {
        parley_prometheus::record_outbound(channel_type);
    }

    pub fn decision(plan: &'static str) {
        parley_prometheus::record_decision(plan);
    }

    pub fn escalation(reason: &str) {
        parley_prometheus::record_escalation(reason);
    }

    pub fn flow_action(action: &str, succeeded: bool) {
        parley_prometheus::record_flow_action(action, if succeeded { "ok" } else { "failed" });
    }

    pub fn redelivery(consumer: &str) {
        parley_prometheus::record_redelivery(consumer);
    }

    pub fn ai_latency(seconds: f64) {
        parley_prometheus::record_ai_latency(seconds);
    }

    pub fn status_update(status: &str, outcome: &'static str) {
        parley_prometheus::record_status_update(status, outcome);
    }
}

#[cfg(not(feature = "prometheus"))]
mod imp {
    pub fn inbound(_: &str) {}
    pub fn outbound(_: &str) {}
    pub fn decision(_: &'static str) {}
    pub fn escalation(_: &str) {}
    pub fn flow_action(_: &str, _: bool) {}
    pub fn redelivery(_: &str) {}
    pub fn ai_latency(_: f64) {}
    pub fn status_update(_: &str, _: &'static str) {}
}

pub(crate) use imp::*;
