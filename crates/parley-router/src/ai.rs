// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded AI reply generation.
//!
//! Calls are limited per tenant by a semaphore and bounded by a timeout that
//! covers both the wait for a permit and the provider call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parley_config::model::OrchestratorConfig;
use parley_context::ConversationContext;
use parley_core::bot::Bot;
use parley_core::traits::knowledge::Snippet;
use parley_core::traits::provider::{CompletionRequest, PromptMessage, PromptRole};
use parley_core::types::Message;
use parley_core::{KnowledgeAdapter, ParleyError, ProviderAdapter};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Provider used when a bot does not name one.
pub const DEFAULT_PROVIDER: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub struct AiReply {
    pub text: String,
    pub confidence: f32,
    pub latency: Duration,
    pub grounded_on: usize,
}

/// Why no reply was produced.
#[derive(Debug)]
pub enum AiError {
    /// No provider registered under the bot's provider name.
    Misconfigured(String),
    Timeout(Duration),
    Failed(ParleyError),
}

pub struct AiResponder {
    providers: HashMap<String, Arc<dyn ProviderAdapter + Send + Sync>>,
    knowledge: Option<Arc<dyn KnowledgeAdapter + Send + Sync>>,
    limits: DashMap<String, Arc<Semaphore>>,
    per_tenant: usize,
    timeout: Duration,
    top_k: usize,
}

impl AiResponder {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            providers: HashMap::new(),
            knowledge: None,
            limits: DashMap::new(),
            per_tenant: config.tenant_ai_concurrency.max(1),
            timeout: Duration::from_secs(config.ai_timeout_secs),
            top_k: config.knowledge_top_k,
        }
    }

    /// Registers a provider under `name`, matched against the bot's `provider`.
    pub fn with_provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn ProviderAdapter + Send + Sync>,
    ) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeAdapter + Send + Sync>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    fn limit_for(&self, tenant_id: &str) -> Arc<Semaphore> {
        self.limits
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_tenant)))
            .clone()
    }

    pub async fn generate(
        &self,
        tenant_id: &str,
        bot: &Bot,
        context: &ConversationContext,
        inbound: &Message,
    ) -> Result<AiReply, AiError> {
        let name = bot.config.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
        let Some(provider) = self.providers.get(name).cloned() else {
            return Err(AiError::Misconfigured(format!(
                "bot {} uses provider '{name}' which is not registered",
                bot.id
            )));
        };

        let started = Instant::now();
        let call = async {
            let limit = self.limit_for(tenant_id);
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|_| ParleyError::Internal("AI concurrency limiter closed".into()))?;

            let snippets = self.ground(bot, inbound).await;
            let request = build_request(bot, context, inbound, &snippets);
            let completion = provider.complete(request).await?;
            Ok::<_, ParleyError>((completion, snippets.len()))
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok((completion, grounded_on))) => {
                let latency = started.elapsed();
                debug!(
                    conversation_id = context.conversation_id.as_str(),
                    provider = name,
                    confidence = completion.confidence,
                    latency_ms = latency.as_millis() as u64,
                    grounded_on,
                    "AI reply generated"
                );
                Ok(AiReply {
                    text: completion.text,
                    confidence: completion.confidence.clamp(0.0, 1.0),
                    latency,
                    grounded_on,
                })
            }
            Ok(Err(e)) => {
                warn!(
                    conversation_id = context.conversation_id.as_str(),
                    provider = name,
                    error = %e,
                    "AI provider failed"
                );
                Err(AiError::Failed(e))
            }
            Err(_) => {
                warn!(
                    conversation_id = context.conversation_id.as_str(),
                    provider = name,
                    timeout_secs = self.timeout.as_secs(),
                    "AI reply timed out"
                );
                Err(AiError::Timeout(self.timeout))
            }
        }
    }

    /// Knowledge lookup. Failures leave the reply ungrounded.
    async fn ground(&self, bot: &Bot, inbound: &Message) -> Vec<Snippet> {
        let (Some(knowledge), Some(kb_id)) = (&self.knowledge, bot.config.knowledge_base_id.as_deref())
        else {
            return Vec::new();
        };
        if self.top_k == 0 || inbound.content.trim().is_empty() {
            return Vec::new();
        }
        match knowledge.query(kb_id, &inbound.content, self.top_k).await {
            Ok(mut snippets) => {
                snippets.truncate(self.top_k);
                snippets
            }
            Err(e) => {
                warn!(
                    knowledge_base_id = kb_id,
                    error = %e,
                    "knowledge lookup failed, answering without grounding"
                );
                Vec::new()
            }
        }
    }
}

fn build_request(
    bot: &Bot,
    context: &ConversationContext,
    inbound: &Message,
    snippets: &[Snippet],
) -> CompletionRequest {
    let mut system = bot.config.system_prompt.clone().unwrap_or_default();
    if !snippets.is_empty() {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str("Answer using this knowledge when relevant:\n");
        for snippet in snippets {
            system.push_str("- ");
            system.push_str(snippet.content.trim());
            system.push('\n');
        }
    }

    let mut messages = context.prompt_history();
    if !context.contains_message(&inbound.id) && !inbound.content.trim().is_empty() {
        messages.push(PromptMessage {
            role: PromptRole::User,
            content: inbound.content.clone(),
        });
    }

    CompletionRequest {
        model: bot.config.model.clone(),
        system_prompt: (!system.is_empty()).then_some(system),
        messages,
        max_tokens: bot.config.max_tokens,
        temperature: bot.config.temperature,
    }
}
