//! Token streaming utilities.
//!
//! Providers return a [`TokenStream`]: ordered text fragments as the model
//! produces them. [`TokenBuffer`] accumulates fragments into the final text.

use crate::error::Result;
use futures::stream::Stream;
use std::pin::Pin;

/// Stream of text fragments (tokens or partial words).
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Accumulates streamed fragments.
#[derive(Debug, Default)]
pub struct TokenBuffer {
    buffer: String,
    chunk_count: usize,
    finished: bool,
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment.
    pub fn add_chunk(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        self.chunk_count += 1;
    }

    /// Mark the stream as finished.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the buffer and return the accumulated text.
    pub fn into_string(self) -> String {
        self.buffer
    }
}
