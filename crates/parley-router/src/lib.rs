// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response routing for the Parley routing core.
//!
//! This crate provides:
//! - [`MessageAnalyzer`]: Heuristic sentiment, human-request and intent signals
//! - [`rules::evaluate`]: Escalation rules in priority order
//! - [`AiResponder`]: Knowledge-grounded AI replies under per-tenant limits
//! - [`EscalationService`]: Atomic handover to a human agent
//! - [`Orchestrator`]: The per-message decision between flow, AI and human

pub mod ai;
pub mod analysis;
pub mod decide;
pub mod escalation;
pub mod hours;
pub mod rules;

pub use ai::{AiError, AiReply, AiResponder, DEFAULT_PROVIDER};
pub use analysis::{Analysis, MessageAnalyzer, Sentiment};
pub use decide::{detected_intent, Decision, DecisionInput, Orchestrator, ResponsePlan};
pub use escalation::{EscalationRequest, EscalationService};
