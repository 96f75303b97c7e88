// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter trait for messaging platforms (WhatsApp, Telegram, SMS, email).

use async_trait::async_trait;

use crate::envelope::{ChannelPayload, OutboundMessage};
use crate::error::ParleyError;
use crate::traits::adapter::PluginAdapter;

/// Uniform send/receive contract over one messaging platform.
///
/// The wire format of the platform stays inside the adapter; the core only
/// sees [`ChannelPayload`] and [`OutboundMessage`].
#[async_trait]
pub trait ChannelAdapter: PluginAdapter {
    /// Adapter family used in bus subjects, e.g. `whatsapp`.
    fn channel_type(&self) -> &str;

    /// Establishes a connection to the messaging platform.
    async fn connect(&mut self) -> Result<(), ParleyError>;

    /// Delivers a message and returns the platform's id for it.
    async fn send(&self, msg: OutboundMessage) -> Result<String, ParleyError>;

    /// Receives the next inbound event from the platform.
    async fn receive(&self) -> Result<ChannelPayload, ParleyError>;
}
