// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Escalation rule evaluation.

use parley_core::bot::{EscalationRule, EscalationRuleType};
use parley_core::EscalationReason;
use tracing::warn;

use crate::analysis::{contains_any, Analysis};

/// Everything a rule may look at.
#[derive(Debug, Clone)]
pub struct RuleInput<'a> {
    pub text: &'a str,
    pub analysis: &'a Analysis,
    /// AI confidence. `None` for flow output, which skips confidence rules.
    pub confidence: Option<f32>,
}

/// The first rule that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub reason: EscalationReason,
    pub detail: String,
}

/// Evaluates `rules` by ascending priority, ties in declared order, and
/// returns the first that fires.
pub fn evaluate(
    rules: &[EscalationRule],
    input: &RuleInput<'_>,
    default_threshold: f32,
) -> Option<RuleHit> {
    let mut ordered: Vec<&EscalationRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.priority);
    ordered
        .into_iter()
        .find_map(|rule| fires(rule, input, default_threshold))
}

fn fires(rule: &EscalationRule, input: &RuleInput<'_>, default_threshold: f32) -> Option<RuleHit> {
    let value = rule.value.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let lower = input.text.to_lowercase();

    match rule.rule_type {
        EscalationRuleType::LowConfidence => {
            let confidence = input.confidence?;
            let threshold = match value.map(str::parse::<f32>) {
                Some(Ok(threshold)) => threshold,
                Some(Err(e)) => {
                    warn!(value, error = %e, "low_confidence rule value is not a number, using default threshold");
                    default_threshold
                }
                None => default_threshold,
            };
            (confidence < threshold).then(|| RuleHit {
                reason: EscalationReason::LowConfidence,
                detail: format!("confidence {confidence:.2} below {threshold:.2}"),
            })
        }
        EscalationRuleType::Sentiment => {
            let wanted = value.unwrap_or("negative");
            input
                .analysis
                .sentiment
                .as_str()
                .eq_ignore_ascii_case(wanted)
                .then(|| RuleHit {
                    reason: EscalationReason::Sentiment,
                    detail: format!("{} sentiment", input.analysis.sentiment),
                })
        }
        EscalationRuleType::Keyword => {
            let keywords = split_list(value?);
            let hit = keywords
                .iter()
                .find(|k| lower.contains(&k.to_lowercase()))?;
            Some(RuleHit {
                reason: EscalationReason::Keyword,
                detail: format!("keyword '{hit}'"),
            })
        }
        EscalationRuleType::Intent => {
            let detected = input.analysis.intent.as_deref()?;
            detected.eq_ignore_ascii_case(value?).then(|| RuleHit {
                reason: EscalationReason::Intent,
                detail: format!("intent '{detected}'"),
            })
        }
        EscalationRuleType::UserRequest => {
            let requested = input.analysis.human_request
                || value.is_some_and(|v| {
                    let phrases = split_list(v);
                    let phrases: Vec<&str> = phrases.iter().map(String::as_str).collect();
                    contains_any(&lower, &phrases)
                });
            requested.then(|| RuleHit {
                reason: EscalationReason::UserRequest,
                detail: "customer asked for a human".to_string(),
            })
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Sentiment;
    use proptest::prelude::*;

    fn rule(rule_type: EscalationRuleType, value: Option<&str>, priority: i32) -> EscalationRule {
        EscalationRule {
            rule_type,
            value: value.map(String::from),
            priority,
        }
    }

    fn analysis(sentiment: Sentiment, human: bool, intent: Option<&str>) -> Analysis {
        Analysis {
            sentiment,
            human_request: human,
            intent: intent.map(String::from),
        }
    }

    #[test]
    fn low_confidence_below_rule_value() {
        let rules = vec![rule(EscalationRuleType::LowConfidence, Some("0.6"), 0)];
        let a = analysis(Sentiment::Neutral, false, None);
        let hit = evaluate(
            &rules,
            &RuleInput {
                text: "hi",
                analysis: &a,
                confidence: Some(0.4),
            },
            0.7,
        )
        .unwrap();
        assert_eq!(hit.reason, EscalationReason::LowConfidence);

        let miss = evaluate(
            &rules,
            &RuleInput {
                text: "hi",
                analysis: &a,
                confidence: Some(0.65),
            },
            0.7,
        );
        assert!(miss.is_none());
    }

    #[test]
    fn low_confidence_uses_default_threshold_and_skips_flow_output() {
        let rules = vec![rule(EscalationRuleType::LowConfidence, None, 0)];
        let a = analysis(Sentiment::Neutral, false, None);
        let input = |confidence| RuleInput {
            text: "hi",
            analysis: &a,
            confidence,
        };
        assert!(evaluate(&rules, &input(Some(0.65)), 0.7).is_some());
        assert!(evaluate(&rules, &input(None), 0.7).is_none());
    }

    #[test]
    fn priority_order_then_declaration_order() {
        let rules = vec![
            rule(EscalationRuleType::Keyword, Some("cancel"), 5),
            rule(EscalationRuleType::Sentiment, Some("negative"), 1),
            rule(EscalationRuleType::UserRequest, None, 1),
        ];
        let a = analysis(Sentiment::Negative, true, None);
        let hit = evaluate(
            &rules,
            &RuleInput {
                text: "cancel it, get me a human",
                analysis: &a,
                confidence: None,
            },
            0.7,
        )
        .unwrap();
        assert_eq!(hit.reason, EscalationReason::Sentiment);
    }

    #[test]
    fn keyword_intent_and_user_request_values() {
        let a = analysis(Sentiment::Neutral, false, Some("billing"));
        let input = RuleInput {
            text: "I need a LAWYER, quero o gerente",
            analysis: &a,
            confidence: None,
        };
        let keyword = vec![rule(EscalationRuleType::Keyword, Some("refund, lawyer"), 0)];
        assert_eq!(evaluate(&keyword, &input, 0.7).unwrap().detail, "keyword 'lawyer'");

        let intent = vec![rule(EscalationRuleType::Intent, Some("Billing"), 0)];
        assert!(evaluate(&intent, &input, 0.7).is_some());

        let request = vec![rule(EscalationRuleType::UserRequest, Some("gerente"), 0)];
        assert!(evaluate(&request, &input, 0.7).is_some());
    }

    #[test]
    fn no_rules_never_escalate() {
        let a = analysis(Sentiment::Negative, true, Some("x"));
        let input = RuleInput {
            text: "worst human",
            analysis: &a,
            confidence: Some(0.0),
        };
        assert!(evaluate(&[], &input, 0.7).is_none());
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic(confidence in 0.0f32..1.0, text in "[a-z ]{0,30}") {
            let rules = vec![
                rule(EscalationRuleType::Keyword, Some("help"), 2),
                rule(EscalationRuleType::LowConfidence, Some("0.5"), 1),
                rule(EscalationRuleType::UserRequest, None, 3),
            ];
            let a = analysis(Sentiment::Neutral, text.contains("human"), None);
            let input = RuleInput { text: &text, analysis: &a, confidence: Some(confidence) };
            prop_assert_eq!(evaluate(&rules, &input, 0.7), evaluate(&rules, &input, 0.7));
            let low = evaluate(&rules, &input, 0.7)
                .is_some_and(|hit| hit.reason == EscalationReason::LowConfidence);
            prop_assert_eq!(low, confidence < 0.5);
        }
    }
}
