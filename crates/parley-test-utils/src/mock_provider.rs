// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock AI provider for deterministic testing.
//!
//! Scripted completions are returned in order; once the script runs out
//! the default reply is returned. Every request is captured.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::traits::adapter::PluginAdapter;
use parley_core::traits::provider::{Completion, CompletionRequest, ProviderAdapter};
use parley_core::types::{AdapterType, HealthStatus};
use parley_core::ParleyError;

enum Scripted {
    Reply(Completion),
    Failure(String),
}

pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
    default_text: String,
    default_confidence: f32,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Replies "Mock response" with confidence 0.9.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            default_text: "Mock response".to_string(),
            default_confidence: 0.9,
            delay: None,
        }
    }

    /// Replies with the given `(text, confidence)` pairs in order.
    pub fn with_responses(responses: Vec<(String, f32)>) -> Self {
        let script = responses
            .into_iter()
            .map(|(text, confidence)| Scripted::Reply(completion(text, confidence)))
            .collect();
        Self {
            script: Mutex::new(script),
            ..Self::new()
        }
    }

    /// Changes the reply used once the script is exhausted.
    pub fn with_default(mut self, text: impl Into<String>, confidence: f32) -> Self {
        self.default_text = text.into();
        self.default_confidence = confidence;
        self
    }

    /// Sleeps before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn add_response(&self, text: impl Into<String>, confidence: f32) {
        self.script
            .lock()
            .await
            .push_back(Scripted::Reply(completion(text.into(), confidence)));
    }

    /// Makes the next call fail with a provider error.
    pub async fn add_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(Scripted::Failure(message.into()));
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn completion(text: String, confidence: f32) -> Completion {
    Completion {
        text,
        confidence,
        model: Some("mock-model".to_string()),
        tokens_used: Some(10),
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ParleyError> {
        self.requests.lock().await.push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().await.pop_front() {
            Some(Scripted::Reply(completion)) => Ok(completion),
            Some(Scripted::Failure(message)) => Err(ParleyError::Provider {
                message,
                source: None,
            }),
            None => Ok(completion(self.default_text.clone(), self.default_confidence)),
        }
    }
}
