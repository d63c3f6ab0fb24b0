//! Deterministic fakes shared by the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use copilot::executor::{BoundParameters, InvocationError, InvocationResponse};
use copilot::prompts::CLASSIFIER_SYSTEM_PROMPT;
use copilot::{AppStateProvider, Catalog, Headers, OperationInvoker, OperationSummary};
use llm::{ChatModel, ChatRequest, ChatResponse, Embedder, LlmError, TokenStream};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const TRELLO_SPEC: &str = r#"
openapi: 3.0.0
info:
  title: Trello
  version: "1"
servers:
  - url: https://api.trello.com/1
paths:
  /cards:
    post:
      operationId: createCard
      summary: Create a new card in a list
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/NewCard'
      responses:
        "200":
          description: The created card
  /boards/{id}:
    parameters:
      - name: id
        in: path
        required: true
    get:
      operationId: getBoard
      summary: Get a board
  /boards/{id}/lists:
    get:
      operationId: getLists
      summary: Get the lists on a board
      parameters:
        - name: id
          in: path
          required: true
        - name: filter
          in: query
components:
  schemas:
    NewCard:
      type: object
      required: [listId, name]
      properties:
        listId:
          type: string
        name:
          type: string
        desc:
          type: string
"#;

pub fn trello_catalog() -> Arc<Catalog> {
    Arc::new(Catalog::from_text(TRELLO_SPEC).expect("fixture parses"))
}

pub fn trello_state() -> Value {
    json!({
        "state": [
            {"boardId": "b1", "boardName": "Roadmap", "listId": "l1", "listName": "Todo", "cardId": "c1", "cardName": "Ship"}
        ]
    })
}

/// Classifier replies with a fixed JSON body; summarizer prefixes the API
/// response it was shown.
pub struct ScriptedChat {
    classifier_reply: Mutex<String>,
    classify_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(classifier_reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            classifier_reply: Mutex::new(classifier_reply.into()),
            classify_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
        })
    }

    pub fn operations(ids: &[&str]) -> Arc<Self> {
        Self::new(json!({"ids": ids, "bot_message": "On it."}).to_string())
    }

    pub fn direct(message: &str) -> Arc<Self> {
        Self::new(json!({"ids": [], "bot_message": message}).to_string())
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    fn is_classification(request: &ChatRequest) -> bool {
        request
            .messages
            .first()
            .is_some_and(|m| m.content == CLASSIFIER_SYSTEM_PROMPT)
    }

    fn summary_of(request: &ChatRequest) -> String {
        let api_response = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        format!("Summary: {}", api_response)
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, request: ChatRequest) -> llm::Result<ChatResponse> {
        if Self::is_classification(&request) {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(ChatResponse::from_text(self.classifier_reply.lock().clone()));
        }
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::from_text(Self::summary_of(&request)))
    }

    async fn stream(&self, request: ChatRequest) -> llm::Result<TokenStream> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        let text = Self::summary_of(&request);
        let fragments: Vec<llm::Result<String>> = text
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Always unavailable.
pub struct DownChat;

#[async_trait]
impl ChatModel for DownChat {
    async fn chat(&self, _request: ChatRequest) -> llm::Result<ChatResponse> {
        Err(LlmError::ServiceUnavailable("connection refused".to_string()))
    }

    async fn stream(&self, _request: ChatRequest) -> llm::Result<TokenStream> {
        Err(LlmError::ServiceUnavailable("connection refused".to_string()))
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

/// Bag-of-words embedding over a small hashed vocabulary.
pub struct WordEmbedder;

#[async_trait]
impl Embedder for WordEmbedder {
    async fn embed(&self, text: &str) -> llm::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 32];
        for word in text.to_lowercase().split_whitespace() {
            let slot = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize)) % 32;
            vector[slot] += 1.0;
        }
        Ok(vector)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation_id: String,
    pub params: BoundParameters,
}

/// Fake target API. Unscripted operations echo their parameters with a
/// generated id.
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<HashMap<String, std::result::Result<InvocationResponse, InvocationError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, operation_id: &str, status: u16, payload: Value) {
        self.responses
            .lock()
            .insert(operation_id.to_string(), Ok(InvocationResponse::new(status, payload)));
    }

    pub fn fail(&self, operation_id: &str, error: InvocationError) {
        self.responses.lock().insert(operation_id.to_string(), Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn called_ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.operation_id.clone()).collect()
    }
}

#[async_trait]
impl OperationInvoker for FakeApi {
    async fn call(
        &self,
        operation: &OperationSummary,
        params: &BoundParameters,
        _headers: &Headers,
    ) -> std::result::Result<InvocationResponse, InvocationError> {
        self.calls.lock().push(RecordedCall {
            operation_id: operation.id.clone(),
            params: params.clone(),
        });
        if let Some(scripted) = self.responses.lock().get(&operation.id) {
            return scripted.clone();
        }
        let mut payload = json!({"id": format!("{}-1", operation.id)});
        for (name, value) in params {
            payload[name] = value.clone();
        }
        Ok(InvocationResponse::new(200, payload))
    }
}

/// Returns a fixed snapshot and counts fetches.
pub struct FixedState {
    snapshot: Value,
    fetches: AtomicUsize,
}

impl FixedState {
    pub fn new(snapshot: Value) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppStateProvider for FixedState {
    async fn get_state(&self, _app_name: &str, _headers: &Headers) -> copilot::Result<Value> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = self.snapshot.clone();
        snapshot["fetch"] = json!(n);
        Ok(snapshot)
    }
}
