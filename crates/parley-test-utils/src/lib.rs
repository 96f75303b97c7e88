// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides mock adapters and a harness over a temporary SQLite database,
//! so pipeline tests run deterministically without external services.
//!
//! # Components
//!
//! - [`MockChannel`] - Channel adapter with injectable events and captured sends
//! - [`MockProvider`] - AI provider with scripted completions
//! - [`MockKnowledge`] - Knowledge base with fixed snippets
//! - [`TestHarness`] - Full pipeline with manual bus pumping

pub mod harness;
pub mod mock_channel;
pub mod mock_knowledge;
pub mod mock_provider;

pub use harness::{TestHarness, TestHarnessBuilder, BOT_ID, CHANNEL_ID, CHANNEL_TYPE, TENANT_ID};
pub use mock_channel::MockChannel;
pub use mock_knowledge::MockKnowledge;
pub use mock_provider::MockProvider;
