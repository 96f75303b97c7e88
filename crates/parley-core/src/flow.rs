// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow graph definitions.
//!
//! A [`Flow`] is read-only to the routing core. Edits made while a
//! conversation is inside a flow only affect new executions; running
//! executions keep pointing at the node id they stored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a flow gets started.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// First message of a new conversation.
    Welcome,
    /// Inbound text contains `trigger_value`.
    Keyword,
    /// Upstream-detected intent equals `trigger_value`.
    Intent,
    /// Only started explicitly.
    Manual,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Message,
    Question,
    Condition,
    Action,
    End,
}

/// Guard on a transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Always matches. Meant as the trailing "else" branch.
    Default,
    /// Case-insensitive equality with the value or a quick reply of the node.
    ReplyEquals,
    /// Case-insensitive substring.
    Contains,
    /// Regular expression against the raw input.
    Regex,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Tag,
    Assign,
    Escalate,
    SetEntity,
    HttpCall,
}

/// A selectable option presented with a node's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A side effect attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl FlowAction {
    /// Returns a config entry as a string, if present and scalar.
    pub fn config_str(&self, key: &str) -> Option<String> {
        match self.config.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_)) => {
                Some(other.to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTransition {
    pub to_node_id: String,
    pub condition: TransitionCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub quick_replies: Vec<QuickReply>,
    /// Evaluated in declared order.
    #[serde(default)]
    pub transitions: Vec<FlowTransition>,
    #[serde(default)]
    pub actions: Vec<FlowAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub tenant_id: String,
    /// Scopes the flow to one bot. `None` applies to every bot of the tenant.
    #[serde(default)]
    pub bot_id: Option<String>,
    pub name: String,
    pub trigger: TriggerType,
    #[serde(default)]
    pub trigger_value: Option<String>,
    pub start_node_id: String,
    pub nodes: Vec<FlowNode>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Higher priority flows are tried first.
    #[serde(default)]
    pub priority: i32,
}

fn default_active() -> bool {
    true
}

impl Flow {
    /// Looks up a node by id.
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Execution pointer stored inside a conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecutionState {
    pub flow_id: String,
    pub current_node_id: String,
    pub started_at: DateTime<Utc>,
    /// Answers collected by question nodes, keyed by node id.
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

impl FlowExecutionState {
    pub fn new(flow_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            current_node_id: node_id.into(),
            started_at: Utc::now(),
            variables: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_deserializes_from_json() {
        let json = r#"{
            "id": "f1",
            "tenant_id": "t1",
            "name": "greeting",
            "trigger": "welcome",
            "start_node_id": "start",
            "nodes": [
                {"id": "start", "type": "question", "content": "Hi! Sales or support?",
                 "quick_replies": [{"id": "s", "title": "Sales"}],
                 "transitions": [
                    {"to_node_id": "sales", "condition": "reply_equals", "value": "sales"},
                    {"to_node_id": "bye", "condition": "default"}
                 ]},
                {"id": "sales", "type": "message", "content": "Routing to sales",
                 "actions": [{"type": "tag", "config": {"tag": "sales"}}]},
                {"id": "bye", "type": "end", "content": "Bye"}
            ]
        }"#;
        let flow: Flow = serde_json::from_str(json).unwrap();
        assert!(flow.is_active);
        assert_eq!(flow.priority, 0);
        assert_eq!(flow.node("start").unwrap().transitions.len(), 2);
        assert_eq!(
            flow.node("sales").unwrap().actions[0].action_type,
            ActionType::Tag
        );
        assert!(flow.node("missing").is_none());
    }

    #[test]
    fn action_config_str_accepts_scalars() {
        let mut config = BTreeMap::new();
        config.insert("tag".to_string(), serde_json::json!("vip"));
        config.insert("count".to_string(), serde_json::json!(3));
        config.insert("nested".to_string(), serde_json::json!({"a": 1}));
        let action = FlowAction {
            action_type: ActionType::Tag,
            config,
        };
        assert_eq!(action.config_str("tag").as_deref(), Some("vip"));
        assert_eq!(action.config_str("count").as_deref(), Some("3"));
        assert_eq!(action.config_str("nested"), None);
        assert_eq!(action.config_str("absent"), None);
    }
}
