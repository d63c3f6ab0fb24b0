//! Provider traits.
//!
//! Implementations must be `Send + Sync`; the engine shares them as
//! `Arc<dyn ChatModel>` / `Arc<dyn Embedder>` across concurrent turns.

use crate::error::Result;
use crate::message::{ChatRequest, ChatResponse};
use crate::stream::TokenStream;
use async_trait::async_trait;

/// Chat-completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream the response as ordered text fragments.
    ///
    /// The returned stream yields fragments in provider order. An `Err` item
    /// ends the useful part of the stream.
    async fn stream(&self, request: ChatRequest) -> Result<TokenStream>;

    /// Model identifier, used in logs.
    fn model_name(&self) -> &str;

    /// Check if the provider is reachable.
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
