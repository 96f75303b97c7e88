// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bot definitions: AI settings, escalation rules and business hours.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Active,
    Inactive,
    Draft,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscalationRuleType {
    LowConfidence,
    Sentiment,
    Keyword,
    Intent,
    UserRequest,
}

/// A single condition that hands a conversation over to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRule {
    #[serde(rename = "type")]
    pub rule_type: EscalationRuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Lower values are evaluated first.
    #[serde(default)]
    pub priority: i32,
}

/// Opening window for one weekday, `HH:MM` in the bot's timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub start: String,
    pub end: String,
}

/// Business hours. A day without a schedule is closed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkingHours {
    #[serde(default)]
    pub enabled: bool,
    /// IANA timezone name; UTC when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub monday: Option<DaySchedule>,
    #[serde(default)]
    pub tuesday: Option<DaySchedule>,
    #[serde(default)]
    pub wednesday: Option<DaySchedule>,
    #[serde(default)]
    pub thursday: Option<DaySchedule>,
    #[serde(default)]
    pub friday: Option<DaySchedule>,
    #[serde(default)]
    pub saturday: Option<DaySchedule>,
    #[serde(default)]
    pub sunday: Option<DaySchedule>,
}

impl WorkingHours {
    /// Returns the schedule for a weekday.
    pub fn for_weekday(&self, day: chrono::Weekday) -> Option<&DaySchedule> {
        use chrono::Weekday;
        match day {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }
}

/// Per-bot behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Provider adapter name used for AI replies.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Fallback threshold for `low_confidence` rules without a value.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(default)]
    pub working_hours: Option<WorkingHours>,
    /// Acknowledgement sent to the customer on escalation.
    #[serde(default)]
    pub escalation_message: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            confidence_threshold: None,
            knowledge_base_id: None,
            escalation_rules: Vec::new(),
            working_hours: None,
            escalation_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: BotStatus,
    #[serde(default)]
    pub config: BotConfig,
}

impl Bot {
    pub fn is_active(&self) -> bool {
        self.status == BotStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_config_defaults_from_empty_json() {
        let config: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.max_tokens, 1024);
    }

    #[test]
    fn escalation_rule_uses_type_key() {
        let rule: EscalationRule =
            serde_json::from_str(r#"{"type": "low_confidence", "value": "0.6"}"#).unwrap();
        assert_eq!(rule.rule_type, EscalationRuleType::LowConfidence);
        assert_eq!(rule.value.as_deref(), Some("0.6"));
        assert_eq!(rule.priority, 0);
    }

    #[test]
    fn working_hours_lookup_by_weekday() {
        let hours = WorkingHours {
            enabled: true,
            monday: Some(DaySchedule {
                start: "09:00".into(),
                end: "18:00".into(),
            }),
            ..Default::default()
        };
        assert!(hours.for_weekday(chrono::Weekday::Mon).is_some());
        assert!(hours.for_weekday(chrono::Weekday::Sun).is_none());
    }
}
