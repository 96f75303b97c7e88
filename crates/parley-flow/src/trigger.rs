// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Choosing which flow, if any, starts on an inbound message.

use parley_core::flow::{Flow, TriggerType};

/// What the caller knows about the inbound message when no flow is running.
#[derive(Debug, Clone, Default)]
pub struct TriggerSignals<'a> {
    pub text: &'a str,
    pub bot_id: Option<&'a str>,
    pub is_new_conversation: bool,
    pub detected_intent: Option<&'a str>,
}

/// Picks the flow to start.
///
/// Keyword and intent triggers beat `welcome`. Within one class the highest
/// priority wins, then declaration order. `manual` flows never start here.
pub fn select<'f>(flows: &'f [Flow], signals: &TriggerSignals<'_>) -> Option<&'f Flow> {
    let eligible = || {
        flows.iter().filter(|flow| {
            flow.is_active
                && match (&flow.bot_id, signals.bot_id) {
                    (None, _) => true,
                    (Some(scoped), Some(bot)) => scoped == bot,
                    (Some(_), None) => false,
                }
        })
    };

    let specific = best(eligible().filter(|flow| match flow.trigger {
        TriggerType::Keyword => keyword_matches(flow.trigger_value.as_deref(), signals.text),
        TriggerType::Intent => match (flow.trigger_value.as_deref(), signals.detected_intent) {
            (Some(expected), Some(detected)) => expected.trim().eq_ignore_ascii_case(detected.trim()),
            _ => false,
        },
        _ => false,
    }));
    if specific.is_some() {
        return specific;
    }

    if signals.is_new_conversation {
        return best(eligible().filter(|flow| flow.trigger == TriggerType::Welcome));
    }
    None
}

// `max_by_key` keeps the last maximum; iterate reversed so the first declared wins ties.
fn best<'f>(candidates: impl DoubleEndedIterator<Item = &'f Flow>) -> Option<&'f Flow> {
    candidates.rev().max_by_key(|flow| flow.priority)
}

/// Keyword triggers accept a comma separated list.
fn keyword_matches(value: Option<&str>, text: &str) -> bool {
    let Some(value) = value else {
        return false;
    };
    let text = text.to_lowercase();
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .any(|k| text.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str, trigger: TriggerType, value: Option<&str>, priority: i32) -> Flow {
        Flow {
            id: id.into(),
            tenant_id: "t1".into(),
            bot_id: None,
            name: id.into(),
            trigger,
            trigger_value: value.map(String::from),
            start_node_id: "start".into(),
            nodes: vec![],
            is_active: true,
            priority,
        }
    }

    fn signals(text: &str, new: bool) -> TriggerSignals<'_> {
        TriggerSignals {
            text,
            bot_id: Some("bot-1"),
            is_new_conversation: new,
            detected_intent: None,
        }
    }

    #[test]
    fn keyword_beats_welcome_on_first_message() {
        let flows = vec![
            flow("welcome", TriggerType::Welcome, None, 100),
            flow("refund", TriggerType::Keyword, Some("refund, money back"), 0),
        ];
        let picked = select(&flows, &signals("I want my MONEY BACK", true)).unwrap();
        assert_eq!(picked.id, "refund");
    }

    #[test]
    fn welcome_only_for_new_conversations() {
        let flows = vec![flow("welcome", TriggerType::Welcome, None, 0)];
        assert_eq!(select(&flows, &signals("hi", true)).unwrap().id, "welcome");
        assert!(select(&flows, &signals("hi", false)).is_none());
    }

    #[test]
    fn priority_then_declaration_order() {
        let flows = vec![
            flow("a", TriggerType::Keyword, Some("oi"), 1),
            flow("b", TriggerType::Keyword, Some("oi"), 5),
            flow("c", TriggerType::Keyword, Some("oi"), 5),
        ];
        assert_eq!(select(&flows, &signals("oi", false)).unwrap().id, "b");
    }

    #[test]
    fn intent_matches_case_insensitively() {
        let flows = vec![flow("billing", TriggerType::Intent, Some("Billing"), 0)];
        let mut s = signals("anything", false);
        assert!(select(&flows, &s).is_none());
        s.detected_intent = Some("billing");
        assert_eq!(select(&flows, &s).unwrap().id, "billing");
    }

    #[test]
    fn manual_inactive_and_foreign_bot_flows_never_start() {
        let mut inactive = flow("inactive", TriggerType::Welcome, None, 0);
        inactive.is_active = false;
        let mut other_bot = flow("other", TriggerType::Welcome, None, 0);
        other_bot.bot_id = Some("bot-2".into());
        let flows = vec![
            flow("manual", TriggerType::Manual, Some("oi"), 10),
            inactive,
            other_bot,
        ];
        assert!(select(&flows, &signals("oi", true)).is_none());
    }
}
