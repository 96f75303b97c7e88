// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock knowledge base returning fixed snippets per knowledge base id.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::traits::adapter::PluginAdapter;
use parley_core::traits::knowledge::{KnowledgeAdapter, Snippet};
use parley_core::types::{AdapterType, HealthStatus};
use parley_core::ParleyError;

#[derive(Default)]
pub struct MockKnowledge {
    snippets: Mutex<HashMap<String, Vec<Snippet>>>,
    queries: Mutex<Vec<(String, String)>>,
}

impl MockKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_snippet(&self, knowledge_base_id: &str, content: impl Into<String>, score: f32) {
        self.snippets
            .lock()
            .await
            .entry(knowledge_base_id.to_string())
            .or_default()
            .push(Snippet {
                content: content.into(),
                score,
                source: None,
            });
    }

    /// `(knowledge_base_id, text)` of every query, in order.
    pub async fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl PluginAdapter for MockKnowledge {
    fn name(&self) -> &str {
        "mock-knowledge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Knowledge
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl KnowledgeAdapter for MockKnowledge {
    async fn query(
        &self,
        knowledge_base_id: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<Snippet>, ParleyError> {
        self.queries
            .lock()
            .await
            .push((knowledge_base_id.to_string(), text.to_string()));
        let mut found = self
            .snippets
            .lock()
            .await
            .get(knowledge_base_id)
            .cloned()
            .unwrap_or_default();
        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        found.truncate(top_k);
        Ok(found)
    }
}
