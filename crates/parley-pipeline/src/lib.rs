// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message pipeline of the Parley routing core.
//!
//! Inbound events flow `channel adapter -> Ingestor -> bus -> InboundProcessor
//! -> Dispatcher -> bus -> DeliveryWorker -> channel adapter`, and delivery
//! receipts come back through [`StatusReconciler`].

pub mod channels;
pub mod dispatch;
pub mod ingest;
pub mod maintenance;
mod metrics;
pub mod normalize;
pub mod processor;
pub mod service;
pub mod shutdown;
pub mod status;

pub use channels::{ChannelRegistry, DeliveryWorker, SharedChannel};
pub use dispatch::{Dispatcher, SendRequest};
pub use ingest::Ingestor;
pub use maintenance::{sweep_once, SweepReport};
pub use normalize::{normalize, NormalizedInbound};
pub use processor::{reply_id, InboundProcessor, ProcessOutcome};
pub use service::{Pipeline, PipelineBuilder, RunningPipeline};
pub use shutdown::install_signal_handler;
pub use status::StatusReconciler;
