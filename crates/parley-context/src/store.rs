// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cached, persisted context store with single-writer access per conversation.
//!
//! Every mutation goes through a [`ContextGuard`], which holds the
//! conversation's lock from load to save. Changes made through a guard are
//! only visible to others after [`ContextGuard::save`]; a guard dropped
//! without saving discards them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use parley_config::model::ContextConfig;
use parley_core::flow::FlowExecutionState;
use parley_core::types::Message;
use parley_core::{ParleyError, StorageAdapter};

use crate::context::ConversationContext;
use crate::locks::KeyedLocks;

pub struct ContextStore {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    cache: DashMap<String, ConversationContext>,
    locks: KeyedLocks,
    history_window: usize,
    idle_ttl: Duration,
}

impl ContextStore {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>, config: &ContextConfig) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
            locks: KeyedLocks::new(),
            history_window: config.history_window,
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
        }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Acquires the conversation's lock and loads its context, creating an
    /// empty one if none exists.
    pub async fn lock(&self, conversation_id: &str) -> Result<ContextGuard<'_>, ParleyError> {
        let lock = self.locks.acquire(conversation_id).await;
        let context = self.load(conversation_id).await?;
        Ok(ContextGuard {
            store: self,
            context,
            _lock: lock,
        })
    }

    /// Snapshot of the context. Does not wait for in-progress writers.
    pub async fn get(&self, conversation_id: &str) -> Result<ConversationContext, ParleyError> {
        self.load(conversation_id).await
    }

    async fn load(&self, conversation_id: &str) -> Result<ConversationContext, ParleyError> {
        if let Some(cached) = self.cache.get(conversation_id) {
            return Ok(cached.clone());
        }

        let context = match self.storage.load_context(conversation_id).await? {
            Some(stored) => match serde_json::from_str::<ConversationContext>(&stored.data) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!(
                        conversation_id,
                        error = %e,
                        "stored context is unreadable, starting fresh"
                    );
                    ConversationContext::new(conversation_id)
                }
            },
            None => ConversationContext::new(conversation_id),
        };
        // A writer may have saved while storage was read; keep its version.
        let cached = self
            .cache
            .entry(conversation_id.to_string())
            .or_insert(context)
            .clone();
        Ok(cached)
    }

    async fn persist(&self, context: &mut ConversationContext) -> Result<(), ParleyError> {
        context.updated_at = Utc::now();
        let data = serde_json::to_string(&*context).map_err(ParleyError::storage)?;
        self.storage
            .save_context(&context.conversation_id, &data)
            .await?;
        self.cache
            .insert(context.conversation_id.clone(), context.clone());
        Ok(())
    }

    /// Appends a message to the rolling history. Returns false if it was
    /// already there.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<bool, ParleyError> {
        let mut guard = self.lock(conversation_id).await?;
        let added = guard.append_message(message);
        if added {
            guard.save().await?;
        }
        Ok(added)
    }

    pub async fn set_flow_state(
        &self,
        conversation_id: &str,
        state: FlowExecutionState,
    ) -> Result<(), ParleyError> {
        let mut guard = self.lock(conversation_id).await?;
        guard.set_flow_state(state);
        guard.save().await
    }

    pub async fn clear_flow_state(&self, conversation_id: &str) -> Result<(), ParleyError> {
        let mut guard = self.lock(conversation_id).await?;
        if guard.clear_flow_state().is_some() {
            guard.save().await?;
        }
        Ok(())
    }

    pub async fn set_variable(
        &self,
        conversation_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ParleyError> {
        let mut guard = self.lock(conversation_id).await?;
        guard.set_variable(key, value);
        guard.save().await
    }

    pub async fn get_variable(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, ParleyError> {
        Ok(self.get(conversation_id).await?.variables.get(key).cloned())
    }

    /// Evicts contexts idle since before `now - idle_ttl` from the cache and
    /// from storage, skipping conversations currently locked. Returns the
    /// number of contexts evicted.
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> Result<usize, ParleyError> {
        let ttl = chrono::Duration::from_std(self.idle_ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut evicted: HashSet<String> = HashSet::new();
        self.cache.retain(|id, ctx| {
            let keep = ctx.updated_at >= cutoff || self.locks.is_busy(id);
            if !keep {
                evicted.insert(id.clone());
            }
            keep
        });

        for id in self.storage.list_idle_contexts(cutoff).await? {
            let Some(_lock) = self.locks.try_acquire(&id) else {
                continue;
            };
            // A writer may have saved between the listing and the lock.
            let still_idle = self
                .storage
                .load_context(&id)
                .await?
                .is_some_and(|stored| stored.updated_at < cutoff);
            if !still_idle {
                continue;
            }
            self.storage.delete_context(&id).await?;
            self.cache.remove(&id);
            evicted.insert(id);
        }

        let evicted = evicted.len();
        let pruned = self.locks.prune();
        if evicted > 0 || pruned > 0 {
            info!(evicted, pruned_locks = pruned, "context garbage collection");
        } else {
            debug!("context garbage collection found nothing idle");
        }
        Ok(evicted)
    }

    /// Number of cached contexts.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Exclusive, mutable view of one conversation's context.
pub struct ContextGuard<'a> {
    store: &'a ContextStore,
    context: ConversationContext,
    _lock: OwnedMutexGuard<()>,
}

impl ContextGuard<'_> {
    pub fn conversation_id(&self) -> &str {
        &self.context.conversation_id
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn flow_state(&self) -> Option<&FlowExecutionState> {
        self.context.flow.as_ref()
    }

    pub fn flow_state_mut(&mut self) -> Option<&mut FlowExecutionState> {
        self.context.flow.as_mut()
    }

    pub fn append_message(&mut self, message: Message) -> bool {
        let window = self.store.history_window;
        self.context.append_message(message, window)
    }

    pub fn set_flow_state(&mut self, state: FlowExecutionState) {
        self.context.set_flow_state(state);
    }

    pub fn clear_flow_state(&mut self) -> Option<FlowExecutionState> {
        self.context.clear_flow_state()
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.set_variable(key, value);
    }

    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.variable(key)
    }

    /// Persists the context and publishes it to the cache.
    pub async fn save(&mut self) -> Result<(), ParleyError> {
        self.store.persist(&mut self.context).await
    }
}
