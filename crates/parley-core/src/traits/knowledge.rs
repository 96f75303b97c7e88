// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge base lookup used to ground AI replies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ParleyError;
use crate::traits::adapter::PluginAdapter;

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub source: Option<String>,
}

#[async_trait]
pub trait KnowledgeAdapter: PluginAdapter {
    /// Returns up to `top_k` snippets, best first.
    async fn query(
        &self,
        knowledge_base_id: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<Snippet>, ParleyError>;
}
