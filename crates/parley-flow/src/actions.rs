// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node actions.
//!
//! Every action is retried locally with exponential backoff so a redelivered
//! inbound message never repeats a side effect that already happened. An
//! action that exhausts its attempts is recorded as failed; the message
//! itself still succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parley_config::model::FlowConfig;
use parley_core::flow::{ActionType, FlowAction};
use parley_core::{ParleyError, StorageAdapter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::template;

/// Largest response body kept by `http_call`.
const MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// Result of running one action, kept in the execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub node_id: String,
    pub action: ActionType,
    pub succeeded: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Change an action asks the engine to apply to the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEffect {
    Escalate { detail: Option<String> },
    SetVariable { key: String, value: Value },
}

/// Variables visible to action config templates.
pub struct ActionScope<'a> {
    pub conversation_id: &'a str,
    pub flow_vars: &'a BTreeMap<String, Value>,
    pub scratch: &'a BTreeMap<String, Value>,
}

impl ActionScope<'_> {
    fn render(&self, raw: &str) -> String {
        template::render(raw, self.flow_vars, self.scratch)
    }

    fn required(&self, action: &FlowAction, key: &str) -> Result<String, ParleyError> {
        action
            .config_str(key)
            .map(|raw| self.render(&raw))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ParleyError::Flow(format!("{} action requires config '{key}'", action.action_type))
            })
    }
}

pub struct ActionRunner {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    client: reqwest::Client,
    max_attempts: u32,
    backoff: Duration,
}

impl ActionRunner {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        config: &FlowConfig,
    ) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| ParleyError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            storage,
            client,
            max_attempts: config.action_max_attempts.max(1),
            backoff: Duration::from_millis(config.action_backoff_ms),
        })
    }

    /// Runs `action`, retrying transient failures.
    pub async fn run(
        &self,
        scope: &ActionScope<'_>,
        node_id: &str,
        action: &FlowAction,
    ) -> (ActionOutcome, Option<ActionEffect>) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_once(scope, action).await {
                Ok(effect) => {
                    debug!(
                        conversation_id = scope.conversation_id,
                        node_id,
                        action = %action.action_type,
                        attempt,
                        "flow action succeeded"
                    );
                    let outcome = ActionOutcome {
                        node_id: node_id.to_string(),
                        action: action.action_type,
                        succeeded: true,
                        attempts: attempt,
                        error: None,
                    };
                    return (outcome, effect);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        conversation_id = scope.conversation_id,
                        node_id,
                        action = %action.action_type,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying flow action after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        conversation_id = scope.conversation_id,
                        node_id,
                        action = %action.action_type,
                        attempt,
                        error = %e,
                        "flow action failed"
                    );
                    let outcome = ActionOutcome {
                        node_id: node_id.to_string(),
                        action: action.action_type,
                        succeeded: false,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                    return (outcome, None);
                }
            }
        }
    }

    async fn run_once(
        &self,
        scope: &ActionScope<'_>,
        action: &FlowAction,
    ) -> Result<Option<ActionEffect>, ParleyError> {
        match action.action_type {
            ActionType::Tag => {
                let tag = scope.required(action, "tag")?;
                self.storage
                    .add_conversation_tag(scope.conversation_id, tag.trim())
                    .await?;
                Ok(None)
            }
            ActionType::Assign => {
                let user_id = scope.required(action, "user_id")?;
                self.storage
                    .assign_conversation(scope.conversation_id, user_id.trim())
                    .await?;
                Ok(None)
            }
            ActionType::Escalate => Ok(Some(ActionEffect::Escalate {
                detail: action.config_str("reason").map(|r| scope.render(&r)),
            })),
            ActionType::SetEntity => {
                let key = scope.required(action, "key")?;
                let value = match action.config.get("value") {
                    Some(Value::String(raw)) => Value::String(scope.render(raw)),
                    Some(other) => other.clone(),
                    None => Value::Null,
                };
                Ok(Some(ActionEffect::SetVariable { key, value }))
            }
            ActionType::HttpCall => self.http_call(scope, action).await,
        }
    }

    async fn http_call(
        &self,
        scope: &ActionScope<'_>,
        action: &FlowAction,
    ) -> Result<Option<ActionEffect>, ParleyError> {
        let url = scope.required(action, "url")?;
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| ParleyError::Flow(format!("http_call has an invalid url: {e}")))?;
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ParleyError::Flow(format!(
                "http_call url scheme '{scheme}' not allowed"
            )));
        }

        let method_str = action.config_str("method").unwrap_or_else(|| "GET".to_string());
        let method = method_str
            .to_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|e| ParleyError::Flow(format!("http_call method '{method_str}': {e}")))?;

        let mut request = self.client.request(method, parsed);
        if let Some(Value::Object(headers)) = action.config.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), scope.render(value));
                }
            }
        }
        match action.config.get("body") {
            Some(Value::String(raw)) => request = request.body(scope.render(raw)),
            Some(Value::Null) | None => {}
            Some(json) => request = request.json(json),
        }

        let response = request.send().await.map_err(|e| ParleyError::Provider {
            message: format!("http_call request failed: {e}"),
            source: Some(Box::new(e)),
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| ParleyError::Provider {
            message: format!("http_call failed to read response body: {e}"),
            source: Some(Box::new(e)),
        })?;

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ParleyError::Provider {
                message: format!("http_call returned {status}"),
                source: None,
            });
        }
        if !status.is_success() {
            return Err(ParleyError::Flow(format!("http_call returned {status}")));
        }

        let Some(save_as) = action.config_str("save_as").filter(|k| !k.trim().is_empty()) else {
            return Ok(None);
        };
        let value = match serde_json::from_str::<Value>(&body) {
            Ok(json) => json,
            Err(_) => {
                let mut text = body;
                if text.len() > MAX_RESPONSE_SIZE {
                    let mut cut = MAX_RESPONSE_SIZE;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                Value::String(text)
            }
        };
        Ok(Some(ActionEffect::SetVariable {
            key: save_as,
            value,
        }))
    }
}
