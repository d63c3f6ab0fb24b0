//! Remote (cloud-hosted) provider implementations.

pub mod openai;

pub use openai::{OpenAiClient, OpenAiEmbedder};
