// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley message routing core.
//!
//! This crate provides the domain model (messages, conversations, flows,
//! bots, escalation records), the bus envelopes, the error type, and the
//! adapter traits implemented by channels, AI providers, knowledge bases
//! and storage backends.

pub mod bot;
pub mod envelope;
pub mod error;
pub mod escalation;
pub mod flow;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{BoxError, ErrorClass, ParleyError};
pub use escalation::{EscalationReason, EscalationRecord};
pub use types::{
    AdapterType, Conversation, ConversationStatus, HealthStatus, Message, MessageStatus,
};

pub use traits::{
    ChannelAdapter, KnowledgeAdapter, PluginAdapter, ProviderAdapter, StorageAdapter,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_follow_taxonomy() {
        let storage = ParleyError::storage(std::io::Error::other("disk"));
        assert!(storage.is_transient());

        let timeout = ParleyError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        assert!(timeout.is_transient());

        assert_eq!(
            ParleyError::InvalidPayload("no sender".into()).class(),
            ErrorClass::Data
        );
        assert_eq!(
            ParleyError::not_found("node", "n9").class(),
            ErrorClass::Data
        );
        assert_eq!(
            ParleyError::Config("no bot".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            ParleyError::AdapterNotFound {
                adapter_type: "Provider".into(),
                name: "openai".into(),
            }
            .class(),
            ErrorClass::Configuration
        );
    }

    #[test]
    fn not_found_message_names_kind() {
        let err = ParleyError::not_found("flow", "f1");
        assert_eq!(err.to_string(), "flow not found: f1");
    }

    #[test]
    fn adapter_type_round_trip() {
        use std::str::FromStr;

        for variant in [
            AdapterType::Channel,
            AdapterType::Provider,
            AdapterType::Knowledge,
            AdapterType::Storage,
            AdapterType::Bus,
            AdapterType::Observability,
        ] {
            let s = variant.to_string();
            assert_eq!(AdapterType::from_str(&s).expect("should parse back"), variant);
        }
    }

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_channel_adapter<T: ChannelAdapter>() {}
        fn _assert_provider_adapter<T: ProviderAdapter>() {}
        fn _assert_knowledge_adapter<T: KnowledgeAdapter>() {}
        fn _assert_storage_adapter<T: StorageAdapter>() {}
    }
}
