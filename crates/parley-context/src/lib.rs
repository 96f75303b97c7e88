// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation context store for the Parley routing core.
//!
//! Holds the rolling message history, the flow execution pointer and the
//! scratch variables of each conversation. All mutations of one
//! conversation are serialized through a keyed lock; different
//! conversations proceed in parallel.

pub mod context;
pub mod locks;
pub mod store;

pub use context::ConversationContext;
pub use locks::KeyedLocks;
pub use store::{ContextGuard, ContextStore};
