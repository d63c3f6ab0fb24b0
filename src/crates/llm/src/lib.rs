//! Language-model provider seam for the copilot engine.
//!
//! The orchestration core never talks to a model vendor directly. It depends on
//! two small traits defined here:
//!
//! - [`ChatModel`] - one-shot completion (`chat`) and incremental token
//!   streaming (`stream`). Used for intent classification and for rendering
//!   API results back into natural language.
//! - [`Embedder`] - turns a description into a vector for the action-sequence
//!   similarity index.
//!
//! # Remote Providers
//!
//! - **OpenAI** (and any OpenAI-compatible endpoint) - chat completions,
//!   server-sent-event streaming and embeddings.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use llm::remote::OpenAiClient;
//! use llm::{ChatModel, ChatRequest, Message, RemoteLlmConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RemoteLlmConfig::from_env(
//!         "OPENAI_API_KEY",
//!         "https://api.openai.com/v1",
//!         "gpt-3.5-turbo-16k",
//!     )?;
//!     let client = OpenAiClient::new(config)?;
//!
//!     let request = ChatRequest::new(vec![
//!         Message::system("You only respond in json."),
//!         Message::human("create a card named Demo"),
//!     ])
//!     .with_temperature(0.0);
//!
//!     let response = client.chat(request).await?;
//!     println!("{}", response.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut stream = client.stream(request).await?;
//! while let Some(fragment) = stream.next().await {
//!     print!("{}", fragment?);
//! }
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod traits;

#[cfg(feature = "remote")]
pub mod remote;

pub use config::RemoteLlmConfig;
pub use error::{LlmError, Result};
pub use message::{ChatRequest, ChatResponse, Message, MessageRole, UsageMetadata};
pub use stream::{TokenBuffer, TokenStream};
pub use traits::{ChatModel, Embedder};
