// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the external collaborators of the routing core.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod channel;
pub mod knowledge;
pub mod provider;
pub mod storage;

pub use adapter::PluginAdapter;
pub use channel::ChannelAdapter;
pub use knowledge::{KnowledgeAdapter, Snippet};
pub use provider::{Completion, CompletionRequest, PromptMessage, PromptRole, ProviderAdapter};
pub use storage::{StatusChange, StorageAdapter, StoredContext};
