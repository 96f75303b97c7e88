// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel adapter for deterministic testing.
//!
//! `MockChannel` implements `ChannelAdapter` with injectable inbound events
//! and captured outbound messages for assertion in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use parley_core::envelope::{ChannelPayload, OutboundMessage};
use parley_core::traits::adapter::PluginAdapter;
use parley_core::traits::channel::ChannelAdapter;
use parley_core::types::{AdapterType, HealthStatus};
use parley_core::ParleyError;

/// A mock messaging channel for testing.
///
/// - **inbound**: events injected via `inject()` are returned by `receive()`
/// - **sent**: messages passed to `send()` are captured in order
pub struct MockChannel {
    channel_type: String,
    inbound: Mutex<VecDeque<ChannelPayload>>,
    sent: Mutex<Vec<OutboundMessage>>,
    notify: Notify,
    failures: AtomicU32,
    next_id: AtomicU64,
}

impl MockChannel {
    pub fn new(channel_type: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            notify: Notify::new(),
            failures: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queues an inbound event; the next `receive()` returns it.
    pub async fn inject(&self, payload: ChannelPayload) {
        self.inbound.lock().await.push_back(payload);
        self.notify.notify_one();
    }

    /// Makes the next `count` sends fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn clear_sent(&self) {
        self.sent.lock().await.clear();
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl PluginAdapter for MockChannel {
    fn name(&self) -> &str {
        "mock-channel"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    async fn connect(&mut self) -> Result<(), ParleyError> {
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<String, ParleyError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ParleyError::Channel {
                message: format!("mock send failure for {}", msg.message_id),
                source: None,
            });
        }
        let id = format!("mock-ext-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().await.push(msg);
        Ok(id)
    }

    async fn receive(&self) -> Result<ChannelPayload, ParleyError> {
        loop {
            let notified = self.notify.notified();
            if let Some(payload) = self.inbound.lock().await.pop_front() {
                return Ok(payload);
            }
            notified.await;
        }
    }
}
