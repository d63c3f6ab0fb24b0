//! Response synthesis: turns a direct message or an execution result into
//! the text shown to the user, optionally streamed fragment by fragment.

use crate::executor::ExecutionResult;
use crate::prompts::{API_RESPONSE_PROMPT, DEFAULT_SUMMARY_PROMPT, SUMMARIZE_INSTRUCTION};
use chrono::Utc;
use futures::StreamExt;
use llm::{ChatModel, ChatRequest, Message, TokenBuffer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What to render.
#[derive(Debug, Clone, Copy)]
pub enum RenderInput<'a> {
    /// Returned verbatim.
    Direct(&'a str),
    Execution(&'a ExecutionResult),
}

/// Rendered answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Full text, also for history; for a cancelled stream, the part produced.
    pub text: String,
    /// Fragments delivered to the caller's channel.
    pub forwarded: usize,
    /// The caller's channel closed before the stream ended.
    pub cancelled: bool,
    /// The provider failed and a deterministic summary was used instead.
    pub degraded: bool,
}

impl Rendered {
    fn plain(text: String) -> Self {
        Self {
            text,
            forwarded: 0,
            cancelled: false,
            degraded: false,
        }
    }
}

pub struct ResponseSynthesizer {
    llm: Arc<dyn ChatModel>,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// Render `input`. With a `sink`, fragments are forwarded in provider
    /// order as they arrive.
    pub async fn render(
        &self,
        input: RenderInput<'_>,
        utterance: &str,
        summarization_prompt: &str,
        sink: Option<&mpsc::Sender<String>>,
    ) -> Rendered {
        let result = match input {
            RenderInput::Direct(message) => {
                return forward_whole(message.to_string(), sink, false).await;
            }
            RenderInput::Execution(result) => result,
        };

        let request = ChatRequest::new(build_messages(result, utterance, summarization_prompt))
            .with_temperature(0.0);

        match sink {
            None => match self.llm.chat(request).await {
                Ok(response) => Rendered::plain(response.text),
                Err(e) => {
                    warn!(at = %Utc::now().to_rfc3339(), error = %e, "Summarizer unavailable, using plain summary");
                    let mut rendered = Rendered::plain(fallback_summary(result));
                    rendered.degraded = true;
                    rendered
                }
            },
            Some(sink) => self.stream_to(request, result, sink).await,
        }
    }

    async fn stream_to(
        &self,
        request: ChatRequest,
        result: &ExecutionResult,
        sink: &mpsc::Sender<String>,
    ) -> Rendered {
        let mut stream = match self.llm.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(at = %Utc::now().to_rfc3339(), error = %e, "Summarizer stream unavailable, using plain summary");
                return forward_whole(fallback_summary(result), Some(sink), true).await;
            }
        };

        let mut buffer = TokenBuffer::new();
        let mut forwarded = 0;
        let mut cancelled = false;

        while let Some(item) = stream.next().await {
            let fragment = match item {
                Ok(fragment) => fragment,
                Err(e) => {
                    warn!(error = %e, received = buffer.chunk_count(), "Summarizer stream broke off");
                    break;
                }
            };
            buffer.add_chunk(&fragment);
            if sink.send(fragment).await.is_err() {
                debug!(received = buffer.chunk_count(), "Caller channel closed, stopping stream");
                cancelled = true;
                break;
            }
            forwarded += 1;
        }
        buffer.finish();

        if buffer.content().is_empty() && !cancelled {
            return forward_whole(fallback_summary(result), Some(sink), true).await;
        }

        Rendered {
            text: buffer.into_string(),
            forwarded,
            cancelled,
            degraded: false,
        }
    }
}

async fn forward_whole(
    text: String,
    sink: Option<&mpsc::Sender<String>>,
    degraded: bool,
) -> Rendered {
    let mut forwarded = 0;
    let mut cancelled = false;
    if let Some(sink) = sink {
        if sink.send(text.clone()).await.is_ok() {
            forwarded = 1;
        } else {
            cancelled = true;
        }
    }
    Rendered {
        text,
        forwarded,
        cancelled,
        degraded,
    }
}

fn build_messages(result: &ExecutionResult, utterance: &str, summarization_prompt: &str) -> Vec<Message> {
    let system = if summarization_prompt.trim().is_empty() {
        DEFAULT_SUMMARY_PROMPT
    } else {
        summarization_prompt
    };
    vec![
        Message::system(system),
        Message::human(SUMMARIZE_INSTRUCTION),
        Message::human(utterance),
        Message::human(API_RESPONSE_PROMPT.replace("{response}", &result.aggregate.to_string())),
    ]
}

/// Deterministic text used when the summarizer is unavailable.
pub fn fallback_summary(result: &ExecutionResult) -> String {
    if result.succeeded {
        format!("Done. {}.", result.summary_line())
    } else {
        format!("The request could not be completed: {}.", result.summary_line())
    }
}
