//! OpenAI client implementation.
//!
//! Works against api.openai.com and any gateway exposing the same
//! `/chat/completions` and `/embeddings` surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::remote::{OpenAiClient, OpenAiEmbedder};
//! use llm::RemoteLlmConfig;
//!
//! let config = RemoteLlmConfig::from_env(
//!     "OPENAI_API_KEY",
//!     "https://api.openai.com/v1",
//!     "gpt-3.5-turbo-16k"
//! )?;
//! let chat = OpenAiClient::new(config.clone())?;
//! let embedder = OpenAiEmbedder::new(config.with_model("text-embedding-ada-002"))?;
//! ```

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::message::{ChatRequest, ChatResponse, Message, UsageMetadata};
use crate::stream::TokenStream;
use crate::traits::{ChatModel, Embedder};
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

fn build_http_client(config: &RemoteLlmConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

fn authorize(config: &RemoteLlmConfig, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let req = req.bearer_auth(&config.api_key);
    match &config.organization {
        Some(org) => req.header("OpenAI-Organization", org),
        None => req,
    }
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else if e.is_connect() {
        LlmError::ServiceUnavailable(e.to_string())
    } else {
        LlmError::HttpError(e)
    }
}

/// Sentinel payload that ends an OpenAI-compatible event stream.
const STREAM_DONE: &str = "[DONE]";

/// Decode a `text/event-stream` body into the content deltas it carries.
fn token_stream<S, B>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::try_stream! {
        let mut events = Box::pin(bytes.eventsource());
        while let Some(event) = events.next().await {
            let event = event.map_err(map_event_error)?;
            let data = event.data.trim();
            if data == STREAM_DONE {
                break;
            }
            if data.is_empty() {
                continue;
            }
            match serde_json::from_str::<OpenAiStreamChunk>(data) {
                Ok(chunk) => {
                    for content in chunk.contents() {
                        yield content;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping undecodable stream chunk"),
            }
        }
    };

    Box::pin(stream)
}

fn map_event_error(e: EventStreamError<reqwest::Error>) -> LlmError {
    match e {
        EventStreamError::Transport(e) => map_send_error(e),
        other => LlmError::InvalidResponse(other.to_string()),
    }
}

/// OpenAI chat-completions client.
#[derive(Clone)]
pub struct OpenAiClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiClient {
    /// Create a new OpenAI client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    fn convert_message(&self, msg: &Message) -> OpenAiMessage {
        OpenAiMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
            name: msg.name.clone(),
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.config.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| self.convert_message(m))
                .collect(),
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens,
            stop: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
            stream,
        }
    }

    fn convert_response(&self, openai_resp: OpenAiResponse) -> Result<ChatResponse> {
        let choice = openai_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            usage: openai_resp
                .usage
                .map(|u| UsageMetadata::new(u.prompt_tokens, u.completion_tokens)),
            model: Some(openai_resp.model),
            finish_reason: choice.finish_reason,
        })
    }

    async fn post(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = authorize(&self.config, self.client.post(&url).json(body))
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("OpenAI", status, error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request, false);
        debug!(model = %self.config.model, messages = body.messages.len(), "OpenAI chat request");

        let response = self.post(&body).await?;
        let openai_resp: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        self.convert_response(openai_resp)
    }

    async fn stream(&self, request: ChatRequest) -> Result<TokenStream> {
        let body = self.build_body(&request, true);
        debug!(model = %self.config.model, "OpenAI streaming request");

        let response = self.post(&body).await?;
        Ok(token_stream(response.bytes_stream()))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// OpenAI embeddings client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::InvalidResponse("embedding response was empty".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };

        let response = authorize(&self.config, self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("OpenAI", status, error_text));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

impl OpenAiStreamChunk {
    /// Non-empty content deltas, in choice order.
    fn contents(self) -> impl Iterator<Item = String> {
        self.choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> OpenAiClient {
        OpenAiClient::new(RemoteLlmConfig::new(
            "test-key",
            "https://api.openai.com/v1",
            "gpt-4",
        ))
        .unwrap()
    }

    #[test]
    fn test_message_conversion_all_roles() {
        let client = client();

        let sys = client.convert_message(&Message::system("You are helpful"));
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content, Some("You are helpful".to_string()));

        let user = client.convert_message(&Message::human("Hello").with_name("user-123"));
        assert_eq!(user.role, "user");
        assert_eq!(user.name, Some("user-123".to_string()));

        let asst = client.convert_message(&Message::assistant("Hi there!"));
        assert_eq!(asst.role, "assistant");
    }

    #[test]
    fn test_body_uses_config_temperature_as_fallback() {
        let client = OpenAiClient::new(
            RemoteLlmConfig::new("k", "https://api.openai.com/v1", "gpt-4").with_temperature(0.0),
        )
        .unwrap();

        let body = client.build_body(&ChatRequest::new(vec![Message::human("x")]), true);
        assert_eq!(body.temperature, Some(0.0));
        assert!(body.stream);
        assert!(body.stop.is_none());

        let body = client.build_body(
            &ChatRequest::new(vec![Message::human("x")]).with_temperature(0.5),
            false,
        );
        assert_eq!(body.temperature, Some(0.5));
    }

    #[test]
    fn test_config_with_custom_timeout() {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4")
            .with_timeout(Duration::from_secs(10));
        let client = OpenAiClient::new(config).unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(10));
        assert_eq!(client.model_name(), "gpt-4");
    }

    #[test]
    fn test_response_conversion_basic() {
        let client = client();
        let openai_response: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1234567890,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"ids\": []}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
        }))
        .unwrap();

        let response = client.convert_response(openai_response).unwrap();
        assert_eq!(response.text, "{\"ids\": []}");
        assert_eq!(response.usage.unwrap().total_tokens, 30);
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_response_without_choices_is_invalid() {
        let client = client();
        let openai_response: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4",
            "choices": []
        }))
        .unwrap();

        assert!(matches!(
            client.convert_response(openai_response),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_stream_chunk_decoding() {
        let chunk: OpenAiStreamChunk = serde_json::from_str(
            r#"{"id":"c","choices":[{"index":0,"delta":{"content":"Demo"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Demo"));

        let role_only: OpenAiStreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(role_only.choices[0].delta.content.is_none());
    }

    fn sse_body(parts: &[&str]) -> Vec<std::result::Result<Vec<u8>, reqwest::Error>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_until_done() {
        let body = sse_body(&[
            ": keep-alive\r\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Card \"}}]}\n",
            "\ndata: {\"choices\":[{\"del",
            "ta\":{\"content\":\"Demo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);

        let fragments: Vec<String> = token_stream(futures::stream::iter(body))
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["Card ".to_string(), "Demo".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_skips_undecodable_chunks() {
        let body = sse_body(&[
            "data: not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        ]);

        let fragments: Vec<String> = token_stream(futures::stream::iter(body))
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["ok".to_string()]);
    }
}
