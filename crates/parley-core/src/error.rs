// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley routing core.

use thiserror::Error;

/// Boxed error source carried by the I/O-facing variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type used across all Parley adapter traits and core operations.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing bot or channel configuration).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage { source: BoxError },

    /// Message bus errors (no stream for subject, oversized payload, broker failure).
    #[error("bus error: {message}")]
    Bus {
        message: String,
        source: Option<BoxError>,
    },

    /// Channel adapter errors (connection failure, delivery rejected upstream).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<BoxError>,
    },

    /// AI provider or knowledge base errors.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<BoxError>,
    },

    /// Malformed inbound payload.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Flow definition or execution errors (invalid graph, bad regex).
    #[error("flow error: {0}")]
    Flow(String),

    /// Requested adapter was not found in the registry.
    #[error("adapter not found: {adapter_type}/{name}")]
    AdapterNotFound { adapter_type: String, name: String },

    /// Adapter health check failed.
    #[error("health check failed for {name}: {source}")]
    HealthCheckFailed { name: String, source: BoxError },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to decide between redelivery, escalation and
/// operator alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Broker, storage, provider or channel hiccups. Retried.
    Transient,
    /// Bad input or a broken flow reference. Escalated, never retried.
    Data,
    /// Missing or invalid configuration. Escalated as `misconfigured`.
    Configuration,
}

impl ParleyError {
    /// Shorthand for a storage error from any source.
    pub fn storage(source: impl Into<BoxError>) -> Self {
        ParleyError::Storage {
            source: source.into(),
        }
    }

    /// Shorthand for a bus error without a source.
    pub fn bus(message: impl Into<String>) -> Self {
        ParleyError::Bus {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ParleyError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Classifies the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ParleyError::Storage { .. }
            | ParleyError::Bus { .. }
            | ParleyError::Channel { .. }
            | ParleyError::Provider { .. }
            | ParleyError::HealthCheckFailed { .. }
            | ParleyError::Timeout { .. }
            | ParleyError::Internal(_) => ErrorClass::Transient,
            ParleyError::InvalidPayload(_) | ParleyError::NotFound { .. } | ParleyError::Flow(_) => {
                ErrorClass::Data
            }
            ParleyError::Config(_) | ParleyError::AdapterNotFound { .. } => {
                ErrorClass::Configuration
            }
        }
    }

    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
