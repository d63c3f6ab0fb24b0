//! Intent resolution.
//!
//! Asks a chat model which catalog operations (if any) an utterance needs.
//! The raw reply is parsed into a strict [`ClassifierReply`]; provider failures
//! and malformed replies both end in the same fallback decision, so a
//! misbehaving classifier degrades the turn to a plain-text answer instead of
//! failing it.

use crate::catalog::Catalog;
use crate::config::load_config_file;
use crate::error::{CopilotError, Result};
use crate::prompts::{
    APP_STATE_PROMPT, CLASSIFIER_SYSTEM_PROMPT, FALLBACK_MESSAGE, POLICY_PROMPT,
    REPLY_FORMAT_PROMPT, SUMMARIES_PROMPT,
};
use chrono::Utc;
use llm::{ChatModel, ChatRequest, Message};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which operations a request needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDecision {
    /// Ordered, duplicate-free. Empty means no call is needed.
    pub operation_ids: Vec<String>,
    /// Used verbatim when `operation_ids` is empty.
    pub bot_message: Option<String>,
    /// Set when the decision came from the fallback policy.
    #[serde(default)]
    pub degraded: bool,
}

impl IntentDecision {
    pub fn direct(message: impl Into<String>) -> Self {
        Self {
            operation_ids: Vec::new(),
            bot_message: Some(message.into()),
            degraded: false,
        }
    }

    pub fn operations(ids: Vec<String>, bot_message: Option<String>) -> Self {
        Self {
            operation_ids: ids,
            bot_message,
            degraded: false,
        }
    }

    /// Zero operations with the generic apology text.
    pub fn fallback() -> Self {
        Self {
            operation_ids: Vec::new(),
            bot_message: Some(FALLBACK_MESSAGE.to_string()),
            degraded: true,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.operation_ids.is_empty()
    }

    pub fn is_multi_step(&self) -> bool {
        self.operation_ids.len() > 1
    }
}

/// Strictly-typed reading of a classifier reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierReply {
    Direct { message: String },
    Operations { ids: Vec<String>, message: Option<String> },
    Malformed { raw: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawReply {
    ids: Option<Vec<String>>,
    #[serde(default)]
    bot_message: Option<String>,
}

impl ClassifierReply {
    /// Parse provider text; never fails, unparsable text is `Malformed`.
    pub fn parse(text: &str) -> Self {
        let malformed = |reason: String| ClassifierReply::Malformed {
            raw: text.to_string(),
            reason,
        };

        let Some(json) = extract_json(text) else {
            return malformed("no json object in reply".to_string());
        };
        let raw: RawReply = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(e) => return malformed(e.to_string()),
        };
        let Some(ids) = raw.ids else {
            return malformed("reply has no 'ids' field".to_string());
        };

        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !unique.contains(&id) {
                unique.push(id);
            }
        }

        let message = raw.bot_message.filter(|m| !m.trim().is_empty());
        if !unique.is_empty() {
            return ClassifierReply::Operations {
                ids: unique,
                message,
            };
        }
        match message {
            Some(message) => ClassifierReply::Direct { message },
            None => malformed("empty 'ids' without a 'bot_message'".to_string()),
        }
    }
}

/// Pull the JSON payload out of a model reply.
///
/// Prefers a fenced json block, then a bare fenced block, then the span
/// from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    for fence in ["```json", "```JSON", "```"] {
        if let Some(start) = text.find(fence) {
            let content = &text[start + fence.len()..];
            if let Some(end) = content.find("```") {
                let inner = content[..end].trim();
                if inner.starts_with('{') {
                    return Some(inner);
                }
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].trim())
}

/// Per-app constraints injected into classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyDocument {
    apps: BTreeMap<String, String>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an `app: constraints` map from YAML, JSON or TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config_file(path)
    }

    pub fn with_constraints(mut self, app: impl Into<String>, constraints: impl Into<String>) -> Self {
        self.apps.insert(app.into(), constraints.into());
        self
    }

    pub fn constraints_for(&self, app: &str) -> Option<&str> {
        self.apps.get(app).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

/// Classifies utterances against a catalog.
pub struct IntentResolver {
    llm: Arc<dyn ChatModel>,
    policy: Option<Arc<PolicyDocument>>,
}

impl IntentResolver {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm, policy: None }
    }

    pub fn with_policy(mut self, policy: Arc<PolicyDocument>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Decide which operations the utterance needs.
    ///
    /// Only input validation errors are returned; provider failures and
    /// malformed replies resolve to [`IntentDecision::fallback`].
    pub async fn resolve(
        &self,
        catalog: &Catalog,
        utterance: &str,
        session_id: &str,
        app_state: Option<&Value>,
        app_name: Option<&str>,
    ) -> Result<IntentDecision> {
        if catalog.is_empty() {
            return Err(CopilotError::Validation("catalog has no operations".to_string()));
        }
        if utterance.trim().is_empty() {
            return Err(CopilotError::Validation("utterance is empty".to_string()));
        }

        let reply = match self.classify(catalog, utterance, app_state, app_name).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    app = app_name.unwrap_or("-"),
                    at = %Utc::now().to_rfc3339(),
                    error = %e,
                    "Intent classification unavailable, degrading to fallback"
                );
                return Ok(IntentDecision::fallback());
            }
        };

        match reply {
            ClassifierReply::Direct { message } => {
                debug!(session_id = %session_id, "No operation needed");
                Ok(IntentDecision::direct(message))
            }
            ClassifierReply::Operations { ids, message } => {
                info!(session_id = %session_id, operations = ?ids, "Classifier selected operations");
                Ok(IntentDecision::operations(ids, message))
            }
            ClassifierReply::Malformed { raw, reason } => {
                warn!(
                    session_id = %session_id,
                    app = app_name.unwrap_or("-"),
                    at = %Utc::now().to_rfc3339(),
                    reason = %reason,
                    raw = %raw,
                    "Malformed classifier reply, degrading to fallback"
                );
                Ok(IntentDecision::fallback())
            }
        }
    }

    /// Single classification round-trip.
    pub async fn classify(
        &self,
        catalog: &Catalog,
        utterance: &str,
        app_state: Option<&Value>,
        app_name: Option<&str>,
    ) -> Result<ClassifierReply> {
        let request = ChatRequest::new(self.build_messages(catalog, utterance, app_state, app_name))
            .with_temperature(0.0);
        let response = self.llm.chat(request).await?;
        debug!(model = self.llm.model_name(), reply = %response.text, "Classifier replied");
        Ok(ClassifierReply::parse(&response.text))
    }

    fn build_messages(
        &self,
        catalog: &Catalog,
        utterance: &str,
        app_state: Option<&Value>,
        app_name: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(CLASSIFIER_SYSTEM_PROMPT)];

        let constraints = app_name.and_then(|app| {
            self.policy
                .as_ref()
                .and_then(|policy| policy.constraints_for(app))
        });
        if let Some(constraints) = constraints {
            messages.push(Message::system(
                POLICY_PROMPT.replace("{constraints}", constraints),
            ));
        }

        messages.push(Message::human(
            SUMMARIES_PROMPT.replace("{summaries}", &catalog.summaries_text()),
        ));

        if let Some(state) = app_state.filter(|s| !s.is_null()) {
            messages.push(Message::human(
                APP_STATE_PROMPT
                    .replace("{app}", app_name.unwrap_or("app"))
                    .replace("{state}", &state.to_string()),
            ));
        }

        messages.push(Message::human(utterance));
        messages.push(Message::human(REPLY_FORMAT_PROMPT));
        messages
    }
}
