// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow execution engine for the Parley routing core.
//!
//! [`FlowEngine::advance`] feeds one inbound message to the conversation's
//! flow: it starts a triggered flow or follows the first matching transition
//! of the current node, runs the actions of every node entered, renders the
//! landing node's content and records the result under the message id so a
//! redelivery replays it instead of repeating side effects.

pub mod actions;
pub mod engine;
mod machine;
pub mod simulate;
pub mod template;
pub mod transition;
pub mod trigger;
pub mod validate;

pub use actions::{ActionOutcome, ActionRunner};
pub use engine::{ExecutionResult, FlowEngine, FlowEscalation, FlowSignals, MARKER_SCOPE};
pub use machine::ExecutionStatus;
pub use simulate::{simulate, SimulationStep};
pub use validate::{validate, ValidationReport};
