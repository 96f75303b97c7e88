// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express. All violations are
//! collected; validation does not stop at the first one.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    if !LOG_LEVELS.contains(&config.service.log_level.to_lowercase().as_str()) {
        errors.push(ConfigError::validation(format!(
            "service.log_level `{}` is not one of {}",
            config.service.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    at_least_one(&mut errors, "bus.workers", config.bus.workers as u64);
    at_least_one(&mut errors, "bus.fetch_batch", config.bus.fetch_batch as u64);
    at_least_one(&mut errors, "bus.max_msg_size", config.bus.max_msg_size as u64);
    at_least_one(
        &mut errors,
        "bus.inbound_max_deliver",
        config.bus.inbound_max_deliver.into(),
    );
    at_least_one(
        &mut errors,
        "bus.outbound_max_deliver",
        config.bus.outbound_max_deliver.into(),
    );
    at_least_one(
        &mut errors,
        "bus.status_max_deliver",
        config.bus.status_max_deliver.into(),
    );
    at_least_one(
        &mut errors,
        "context.history_window",
        config.context.history_window as u64,
    );
    at_least_one(
        &mut errors,
        "context.gc_interval_secs",
        config.context.gc_interval_secs,
    );
    at_least_one(
        &mut errors,
        "flow.action_max_attempts",
        config.flow.action_max_attempts.into(),
    );
    at_least_one(
        &mut errors,
        "flow.max_chained_nodes",
        config.flow.max_chained_nodes as u64,
    );
    at_least_one(
        &mut errors,
        "orchestrator.ai_timeout_secs",
        config.orchestrator.ai_timeout_secs,
    );
    at_least_one(
        &mut errors,
        "orchestrator.tenant_ai_concurrency",
        config.orchestrator.tenant_ai_concurrency as u64,
    );

    let threshold = config.orchestrator.default_confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(ConfigError::validation(format!(
            "orchestrator.default_confidence_threshold must be between 0.0 and 1.0, got {threshold}"
        )));
    }

    if config.orchestrator.escalation_message.trim().is_empty() {
        errors.push(ConfigError::validation(
            "orchestrator.escalation_message must not be empty",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn at_least_one(errors: &mut Vec<ConfigError>, key: &str, value: u64) {
    if value < 1 {
        errors.push(ConfigError::validation(format!(
            "{key} must be at least 1, got {value}"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ParleyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let mut config = ParleyConfig::default();
        config.bus.workers = 0;
        config.context.history_window = 0;
        config.orchestrator.default_confidence_threshold = 1.5;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = ParleyConfig::default();
        config.service.log_level = "loud".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            &errors[0],
            ConfigError::Validation { message } if message.contains("service.log_level")
        ));
    }
}
