//! Turn handling: classify, resolve a sequence, execute, render.
//!
//! [`CopilotEngine::handle_turn`] never returns an error. Every failure ends
//! in a user-visible text with [`TurnResponse::error`] set and, where a
//! history sink is attached, a failed analytics outcome.

use crate::app_state::AppStateCache;
use crate::cache::{ActionSequenceCache, WorkflowRepository};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{CopilotError, Result};
use crate::executor::{ExecutionContext, ExecutionResult, Headers, OperationInvoker, SequenceExecutor};
use crate::history::{ChatRole, HistorySink};
use crate::intent::{IntentDecision, IntentResolver, PolicyDocument};
use crate::prompts::FALLBACK_MESSAGE;
use crate::response::{RenderInput, ResponseSynthesizer};
use crate::synthesizer::{ActionSequenceSynthesizer, SynthesisContext};
use crate::workflow::ActionSequence;
use chrono::Utc;
use llm::ChatModel;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Longest accepted utterance, in characters.
pub const MAX_UTTERANCE_CHARS: usize = 255;

/// Header naming the external app when the request does not.
pub const APP_NAME_HEADER: &str = "x-app-name";

/// One user turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub utterance: String,
    pub session_id: String,
    pub spec_id: String,
    pub catalog: Arc<Catalog>,
    pub headers: Headers,
    pub app: Option<String>,
    pub summarization_prompt: String,
    /// Receives answer fragments as they are produced.
    pub fragments: Option<mpsc::Sender<String>>,
}

impl TurnRequest {
    pub fn new(
        utterance: impl Into<String>,
        session_id: impl Into<String>,
        spec_id: impl Into<String>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            utterance: utterance.into(),
            session_id: session_id.into(),
            spec_id: spec_id.into(),
            catalog,
            headers: Headers::new(),
            app: None,
            summarization_prompt: String::new(),
            fragments: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn with_summarization_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summarization_prompt = prompt.into();
        self
    }

    pub fn with_fragments(mut self, sender: mpsc::Sender<String>) -> Self {
        self.fragments = Some(sender);
        self
    }

    /// The explicit app, else the `X-App-Name` header.
    pub fn app_name(&self) -> Option<&str> {
        self.app.as_deref().or_else(|| {
            self.headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(APP_NAME_HEADER))
                .map(|(_, value)| value.as_str())
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurnResponse {
    pub text: String,
    pub execution: Option<ExecutionResult>,
    /// A cached sequence was reused instead of synthesizing one.
    pub reused_sequence: bool,
    pub sequence_id: Option<String>,
    pub error: Option<String>,
}

impl TurnResponse {
    fn failed(text: impl Into<String>, error: &CopilotError) -> Self {
        Self {
            text: text.into(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

pub struct CopilotEngine {
    resolver: IntentResolver,
    cache: ActionSequenceCache,
    synthesizer: ActionSequenceSynthesizer,
    executor: SequenceExecutor,
    responder: ResponseSynthesizer,
    app_state: Option<Arc<AppStateCache>>,
    history: Option<Arc<dyn HistorySink>>,
}

impl CopilotEngine {
    /// `chat` serves both classification and summarization until
    /// [`with_summarizer`](Self::with_summarizer) sets a separate model.
    pub fn new(
        chat: Arc<dyn ChatModel>,
        repository: Arc<dyn WorkflowRepository>,
        invoker: Arc<dyn OperationInvoker>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            resolver: IntentResolver::new(chat.clone()),
            cache: ActionSequenceCache::new(repository, config.similarity_threshold),
            synthesizer: ActionSequenceSynthesizer::new(),
            executor: SequenceExecutor::new(invoker, config.operation_timeout()),
            responder: ResponseSynthesizer::new(chat),
            app_state: None,
            history: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn ChatModel>) -> Self {
        self.responder = ResponseSynthesizer::new(summarizer);
        self
    }

    pub fn with_policy(mut self, policy: Arc<PolicyDocument>) -> Self {
        self.resolver = self.resolver.with_policy(policy);
        self
    }

    pub fn with_app_state(mut self, app_state: Arc<AppStateCache>) -> Self {
        self.app_state = Some(app_state);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cache(&self) -> &ActionSequenceCache {
        &self.cache
    }

    #[tracing::instrument(skip(self, request), fields(session_id = %request.session_id, spec_id = %request.spec_id))]
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnResponse {
        if let Err(e) = validate(&request) {
            warn!(error = %e, "Rejected turn");
            self.record_outcome(false, json!({"session_id": request.session_id, "error": e.to_string()}))
                .await;
            let rendered = self.render_direct(&request, FALLBACK_MESSAGE).await;
            return TurnResponse::failed(rendered, &e);
        }

        let app = request.app_name().map(str::to_string);
        let app_state = match (&self.app_state, app.as_deref()) {
            (Some(cache), Some(app)) => cache.get(app, &request.headers).await,
            _ => None,
        };

        self.record_turn(&request.session_id, ChatRole::User, &request.utterance)
            .await;

        let decision = match self
            .resolver
            .resolve(
                &request.catalog,
                &request.utterance,
                &request.session_id,
                app_state.as_ref(),
                app.as_deref(),
            )
            .await
        {
            Ok(decision) => decision,
            Err(e) => return self.fail_turn(&request, None, &e).await,
        };

        if decision.degraded {
            let error =
                CopilotError::ProviderUnavailable("intent classification unavailable".to_string());
            return self
                .fail_turn(&request, decision.bot_message.as_deref(), &error)
                .await;
        }

        if decision.is_direct() {
            let message = decision.bot_message.as_deref().unwrap_or(FALLBACK_MESSAGE);
            let text = self.render_direct(&request, message).await;
            self.record_turn(&request.session_id, ChatRole::Assistant, &text)
                .await;
            return TurnResponse {
                text,
                ..Default::default()
            };
        }

        let ctx = SynthesisContext {
            utterance: &request.utterance,
            spec_id: &request.spec_id,
            app_state: app_state.as_ref(),
        };
        let (sequence, reused) = match self.resolve_sequence(&decision, &request, &ctx).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail_turn(&request, decision.bot_message.as_deref(), &e).await,
        };

        let context = ExecutionContext::new(request.headers.clone(), app_state);
        let result = self
            .executor
            .execute(&sequence, &request.catalog, &context)
            .await;
        info!(
            sequence_id = %sequence.id,
            succeeded = result.succeeded,
            summary = %result.summary_line(),
            "Sequence executed"
        );

        let rendered = self
            .responder
            .render(
                RenderInput::Execution(&result),
                &request.utterance,
                &request.summarization_prompt,
                request.fragments.as_ref(),
            )
            .await;
        if rendered.cancelled {
            debug!(forwarded = rendered.forwarded, "Caller stopped listening");
        }

        self.record_turn(&request.session_id, ChatRole::Assistant, &rendered.text)
            .await;
        self.record_outcome(
            result.succeeded,
            json!({
                "session_id": request.session_id,
                "spec_id": request.spec_id,
                "sequence_id": sequence.id,
                "summary": result.summary_line(),
                "steps": result.aggregate,
            }),
        )
        .await;

        TurnResponse {
            text: rendered.text,
            reused_sequence: reused,
            sequence_id: Some(sequence.id.clone()),
            execution: Some(result),
            error: None,
        }
    }

    /// Cached sequence rebound to this turn, else a newly synthesized one.
    async fn resolve_sequence(
        &self,
        decision: &IntentDecision,
        request: &TurnRequest,
        ctx: &SynthesisContext<'_>,
    ) -> Result<(ActionSequence, bool)> {
        let unknown = request.catalog.unknown_ids(&decision.operation_ids);
        if !unknown.is_empty() {
            return Err(CopilotError::UnknownOperation {
                ids: unknown.into_iter().map(str::to_string).collect(),
            });
        }

        let hit = match self.cache.find(&request.utterance, &request.spec_id).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(
                    session_id = %request.session_id,
                    at = %Utc::now().to_rfc3339(),
                    error = %e,
                    "Action-sequence lookup failed, synthesizing"
                );
                None
            }
        };

        if let Some(hit) = hit {
            match self.synthesizer.rebind(&hit.sequence, &request.catalog, ctx) {
                Ok(sequence) => {
                    info!(sequence_id = %sequence.id, score = hit.score, "Reusing cached action sequence");
                    return Ok((sequence, true));
                }
                Err(e) => {
                    debug!(sequence_id = %hit.sequence.id, error = %e, "Cached sequence unusable, synthesizing");
                }
            }
        }

        let sequence = self
            .synthesizer
            .synthesize(&decision.operation_ids, &request.catalog, ctx)?;
        if let Err(e) = self.cache.insert(sequence.clone(), &request.utterance).await {
            warn!(sequence_id = %sequence.id, error = %e, "Failed to store action sequence");
        }
        Ok((sequence, false))
    }

    async fn fail_turn(
        &self,
        request: &TurnRequest,
        bot_message: Option<&str>,
        error: &CopilotError,
    ) -> TurnResponse {
        warn!(
            session_id = %request.session_id,
            app = request.app_name().unwrap_or("-"),
            at = %Utc::now().to_rfc3339(),
            error = %error,
            "Turn degraded to direct response"
        );
        let text = self
            .render_direct(request, bot_message.unwrap_or(FALLBACK_MESSAGE))
            .await;
        self.record_turn(&request.session_id, ChatRole::Assistant, &text)
            .await;
        self.record_outcome(
            false,
            json!({"session_id": request.session_id, "spec_id": request.spec_id, "error": error.to_string()}),
        )
        .await;
        TurnResponse::failed(text, error)
    }

    async fn render_direct(&self, request: &TurnRequest, message: &str) -> String {
        self.responder
            .render(
                RenderInput::Direct(message),
                &request.utterance,
                &request.summarization_prompt,
                request.fragments.as_ref(),
            )
            .await
            .text
    }

    async fn record_turn(&self, session_id: &str, role: ChatRole, text: &str) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record_turn(session_id, role, text).await {
                warn!(session_id = %session_id, error = %e, "Failed to record chat turn");
            }
        }
    }

    async fn record_outcome(&self, success: bool, details: Value) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record_outcome(success, &details).await {
                warn!(error = %e, "Failed to record outcome");
            }
        }
    }
}

fn validate(request: &TurnRequest) -> Result<()> {
    if request.utterance.trim().is_empty() {
        return Err(CopilotError::Validation("utterance is empty".to_string()));
    }
    if request.utterance.chars().count() > MAX_UTTERANCE_CHARS {
        return Err(CopilotError::Validation(format!(
            "utterance exceeds {} characters",
            MAX_UTTERANCE_CHARS
        )));
    }
    if request.catalog.is_empty() {
        return Err(CopilotError::Validation("catalog has no operations".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(utterance: &str) -> TurnRequest {
        TurnRequest::new(utterance, "s1", "spec", Arc::new(Catalog::default()))
    }

    #[test]
    fn test_app_name_falls_back_to_header() {
        let mut headers = Headers::new();
        headers.insert("X-App-Name".to_string(), "trello".to_string());
        let req = request("hi").with_headers(headers);
        assert_eq!(req.app_name(), Some("trello"));
        assert_eq!(req.with_app("slack").app_name(), Some("slack"));
    }

    #[test]
    fn test_validation() {
        assert!(validate(&request("   ")).is_err());
        assert!(validate(&request(&"a".repeat(MAX_UTTERANCE_CHARS + 1))).is_err());
        // Empty catalog.
        assert!(validate(&request("create a card")).is_err());
    }
}
