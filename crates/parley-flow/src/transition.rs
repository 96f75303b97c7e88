// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transition guards.

use parley_core::flow::{FlowNode, FlowTransition, TransitionCondition};
use regex::Regex;
use tracing::warn;

/// First transition of `node` whose guard accepts `input`, in declared order.
pub fn select<'n>(node: &'n FlowNode, input: &str) -> Option<&'n FlowTransition> {
    check_default_placement(node);
    node.transitions
        .iter()
        .find(|transition| accepts(node, transition, input))
}

/// Returns true if `transition` accepts `input`.
pub fn accepts(node: &FlowNode, transition: &FlowTransition, input: &str) -> bool {
    let input = input.trim();
    match transition.condition {
        TransitionCondition::Default => true,
        TransitionCondition::ReplyEquals => {
            let Some(value) = transition.value.as_deref() else {
                return false;
            };
            if same_text(input, value) {
                return true;
            }
            // The value may name a quick reply that the customer picked by title or id.
            node.quick_replies.iter().any(|reply| {
                let names_reply = same_text(value, &reply.id)
                    || same_text(value, &reply.title)
                    || reply.value.as_deref().is_some_and(|v| same_text(value, v));
                let picked = same_text(input, &reply.id)
                    || same_text(input, &reply.title)
                    || reply.value.as_deref().is_some_and(|v| same_text(input, v));
                names_reply && picked
            })
        }
        TransitionCondition::Contains => match transition.value.as_deref() {
            Some(value) if !value.is_empty() => {
                input.to_lowercase().contains(&value.to_lowercase())
            }
            _ => false,
        },
        TransitionCondition::Regex => {
            let Some(pattern) = transition.value.as_deref() else {
                return false;
            };
            match Regex::new(pattern) {
                Ok(re) => re.is_match(input),
                Err(e) => {
                    warn!(node_id = node.id.as_str(), pattern, error = %e, "invalid transition regex");
                    false
                }
            }
        }
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn check_default_placement(node: &FlowNode) {
    let defaults: Vec<usize> = node
        .transitions
        .iter()
        .enumerate()
        .filter(|(_, t)| t.condition == TransitionCondition::Default)
        .map(|(i, _)| i)
        .collect();
    let Some(&first) = defaults.first() else {
        return;
    };
    if defaults.len() > 1 || first != node.transitions.len() - 1 {
        warn!(
            node_id = node.id.as_str(),
            defaults = defaults.len(),
            "ambiguous transitions: default is not the single last transition, first declared default wins"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::flow::{NodeType, QuickReply};
    use tracing_test::traced_test;

    fn t(to: &str, condition: TransitionCondition, value: Option<&str>) -> FlowTransition {
        FlowTransition {
            to_node_id: to.into(),
            condition,
            value: value.map(String::from),
        }
    }

    fn node(transitions: Vec<FlowTransition>) -> FlowNode {
        FlowNode {
            id: "start".into(),
            node_type: NodeType::Question,
            content: "Pick one".into(),
            quick_replies: vec![
                QuickReply {
                    id: "qr_sales".into(),
                    title: "Talk to sales".into(),
                    value: None,
                },
                QuickReply {
                    id: "qr_support".into(),
                    title: "Support".into(),
                    value: Some("2".into()),
                },
            ],
            transitions,
            actions: vec![],
        }
    }

    #[test]
    fn contains_is_case_insensitive() {
        let n = node(vec![t("node_2", TransitionCondition::Contains, Some("oi"))]);
        assert_eq!(select(&n, "OI, tudo bem?").unwrap().to_node_id, "node_2");
        assert!(select(&n, "hello").is_none());
    }

    #[test]
    fn reply_equals_matches_value_or_quick_reply() {
        let n = node(vec![
            t("sales", TransitionCondition::ReplyEquals, Some("qr_sales")),
            t("support", TransitionCondition::ReplyEquals, Some("qr_support")),
        ]);
        assert_eq!(select(&n, "qr_sales").unwrap().to_node_id, "sales");
        assert_eq!(select(&n, "talk to SALES").unwrap().to_node_id, "sales");
        assert_eq!(select(&n, "2").unwrap().to_node_id, "support");
        assert!(select(&n, "sales please").is_none());
    }

    #[test]
    fn regex_matches_and_bad_regex_never_matches() {
        let n = node(vec![
            t("bad", TransitionCondition::Regex, Some("([")),
            t("order", TransitionCondition::Regex, Some(r"^\d{5}$")),
        ]);
        assert_eq!(select(&n, " 12345 ").unwrap().to_node_id, "order");
        assert!(select(&n, "1234").is_none());
    }

    #[test]
    fn first_match_wins_in_declared_order() {
        let n = node(vec![
            t("a", TransitionCondition::Contains, Some("help")),
            t("b", TransitionCondition::Contains, Some("help me")),
            t("c", TransitionCondition::Default, None),
        ]);
        assert_eq!(select(&n, "help me").unwrap().to_node_id, "a");
        assert_eq!(select(&n, "bye").unwrap().to_node_id, "c");
    }

    #[traced_test]
    #[test]
    fn misplaced_default_wins_and_warns() {
        let n = node(vec![
            t("d1", TransitionCondition::Default, None),
            t("x", TransitionCondition::Contains, Some("x")),
            t("d2", TransitionCondition::Default, None),
        ]);
        assert_eq!(select(&n, "x").unwrap().to_node_id, "d1");
        assert!(logs_contain("ambiguous transitions"));
    }

    #[test]
    fn missing_value_never_matches() {
        let n = node(vec![
            t("a", TransitionCondition::Contains, None),
            t("b", TransitionCondition::ReplyEquals, None),
        ]);
        assert!(select(&n, "anything").is_none());
    }
}
