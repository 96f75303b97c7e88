// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-conversation state shared by the flow engine and the router.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_core::flow::FlowExecutionState;
use parley_core::traits::{PromptMessage, PromptRole};
use parley_core::types::{Message, SenderType};

/// Rolling history, flow pointer and scratch variables of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// Oldest first.
    #[serde(default)]
    pub history: VecDeque<Message>,
    #[serde(default)]
    pub flow: Option<FlowExecutionState>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            history: VecDeque::new(),
            flow: None,
            variables: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Appends `message` unless a message with the same id is already in
    /// the history, evicting the oldest entries beyond `window`.
    ///
    /// A full window also refuses messages older than its oldest entry, so a
    /// redelivered message that was already evicted does not come back.
    pub fn append_message(&mut self, message: Message, window: usize) -> bool {
        let window = window.max(1);
        if self.contains_message(&message.id) {
            return false;
        }
        if self.history.len() >= window
            && self
                .history
                .front()
                .is_some_and(|oldest| message.created_at < oldest.created_at)
        {
            return false;
        }
        self.history.push_back(message);
        while self.history.len() > window {
            self.history.pop_front();
        }
        true
    }

    pub fn contains_message(&self, id: &str) -> bool {
        self.history.iter().any(|m| m.id == id)
    }

    /// Replaces any running flow.
    pub fn set_flow_state(&mut self, state: FlowExecutionState) {
        self.flow = Some(state);
    }

    pub fn clear_flow_state(&mut self) -> Option<FlowExecutionState> {
        self.flow.take()
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    /// Last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// History as prompt turns. Customer messages become user turns; bot
    /// and human agent replies become assistant turns. System notes are
    /// skipped.
    pub fn prompt_history(&self) -> Vec<PromptMessage> {
        self.history
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .filter_map(|m| {
                let role = match m.sender_type {
                    SenderType::Contact => PromptRole::User,
                    SenderType::Bot | SenderType::User => PromptRole::Assistant,
                    SenderType::System => return None,
                };
                Some(PromptMessage {
                    role,
                    content: m.content.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parley_core::types::{ContentType, MessageStatus};

    pub(crate) fn message(id: &str, sender: SenderType, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_type: sender,
            sender_id: None,
            content_type: ContentType::Text,
            content: content.into(),
            metadata: BTreeMap::new(),
            attachments: vec![],
            status: MessageStatus::Received,
            external_id: None,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn window_evicts_oldest() {
        let mut ctx = ConversationContext::new("c1");
        for i in 0..5 {
            ctx.append_message(message(&format!("m{i}"), SenderType::Contact, "x"), 3);
        }
        let ids: Vec<&str> = ctx.history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn full_window_refuses_evicted_messages() {
        let mut ctx = ConversationContext::new("c1");
        let evicted = message("m0", SenderType::Contact, "x");
        let mut later = message("m1", SenderType::Bot, "y");
        later.created_at = evicted.created_at + chrono::Duration::seconds(1);
        assert!(ctx.append_message(evicted.clone(), 1));
        assert!(ctx.append_message(later, 1));

        assert!(!ctx.append_message(evicted, 1));
        let ids: Vec<&str> = ctx.history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1"]);
    }

    #[test]
    fn append_is_idempotent_by_id() {
        let mut ctx = ConversationContext::new("c1");
        assert!(ctx.append_message(message("m1", SenderType::Contact, "hi"), 10));
        assert!(!ctx.append_message(message("m1", SenderType::Contact, "hi"), 10));
        assert_eq!(ctx.history.len(), 1);
    }

    #[test]
    fn new_flow_replaces_running_one() {
        let mut ctx = ConversationContext::new("c1");
        ctx.set_flow_state(FlowExecutionState::new("f1", "n1"));
        ctx.set_flow_state(FlowExecutionState::new("f2", "start"));
        assert_eq!(ctx.flow.as_ref().unwrap().flow_id, "f2");
        assert_eq!(ctx.clear_flow_state().unwrap().flow_id, "f2");
        assert!(ctx.flow.is_none());
    }

    #[test]
    fn prompt_history_maps_roles() {
        let mut ctx = ConversationContext::new("c1");
        ctx.append_message(message("m1", SenderType::Contact, "where is my order"), 10);
        ctx.append_message(message("m2", SenderType::Bot, "on its way"), 10);
        ctx.append_message(message("m3", SenderType::System, "assigned"), 10);
        let prompt = ctx.prompt_history();
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, PromptRole::User);
        assert_eq!(prompt[1].role, PromptRole::Assistant);
    }

    #[test]
    fn recent_returns_tail() {
        let mut ctx = ConversationContext::new("c1");
        for i in 0..4 {
            ctx.append_message(message(&format!("m{i}"), SenderType::Contact, "x"), 10);
        }
        let tail: Vec<String> = ctx.recent(2).into_iter().map(|m| m.id).collect();
        assert_eq!(tail, vec!["m2", "m3"]);
        assert_eq!(ctx.recent(10).len(), 4);
    }
}
