//! Similarity-indexed action-sequence cache.
//!
//! [`WorkflowRepository`] is the persistence seam (lookup by id, nearest
//! neighbour by description, insert, delete). [`ActionSequenceCache`] sits on
//! top of it and applies the acceptance threshold: a hit is only reported when
//! its score reaches the threshold.

use crate::error::{CopilotError, Result};
use crate::workflow::ActionSequence;
use async_trait::async_trait;
use llm::Embedder;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Storage for action sequences plus their description embeddings.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<ActionSequence>>;

    /// Best match among sequences owned by `spec_id`, with its score.
    async fn find_similar(&self, description: &str, spec_id: &str)
        -> Result<Option<(String, f32)>>;

    /// Store a sequence under its id; returns the id.
    async fn insert(&self, sequence: ActionSequence, description: &str) -> Result<String>;

    /// Returns whether a sequence was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn list_by_spec(&self, spec_id: &str) -> Result<Vec<ActionSequence>>;

    /// Delete-then-insert. The replacement gets a new id.
    async fn replace(
        &self,
        id: &str,
        sequence: ActionSequence,
        description: &str,
    ) -> Result<String> {
        if !self.delete(id).await? {
            return Err(CopilotError::Store(format!("no action sequence with id {}", id)));
        }
        self.insert(sequence.with_new_id(), description).await
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct IndexedSequence {
    sequence: ActionSequence,
    embedding: Vec<f32>,
}

/// In-process repository with a linear cosine scan.
pub struct InMemoryWorkflowRepository {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<HashMap<String, IndexedSequence>>,
}

impl InMemoryWorkflowRepository {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get_by_id(&self, id: &str) -> Result<Option<ActionSequence>> {
        Ok(self.entries.read().get(id).map(|e| e.sequence.clone()))
    }

    async fn find_similar(
        &self,
        description: &str,
        spec_id: &str,
    ) -> Result<Option<(String, f32)>> {
        let query = self.embedder.embed(description).await?;
        let entries = self.entries.read();
        let best = entries
            .iter()
            .filter(|(_, e)| e.sequence.owner_spec_id == spec_id)
            .map(|(id, e)| (id.clone(), cosine_similarity(&query, &e.embedding)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best)
    }

    async fn insert(&self, sequence: ActionSequence, description: &str) -> Result<String> {
        let embedding = self.embedder.embed(description).await?;
        let id = sequence.id.clone();
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(CopilotError::Store(format!("action sequence {} already stored", id)));
        }
        entries.insert(
            id.clone(),
            IndexedSequence {
                sequence,
                embedding,
            },
        );
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }

    async fn list_by_spec(&self, spec_id: &str) -> Result<Vec<ActionSequence>> {
        let mut found: Vec<ActionSequence> = self
            .entries
            .read()
            .values()
            .filter(|e| e.sequence.owner_spec_id == spec_id)
            .map(|e| e.sequence.clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

/// A reused sequence and how closely it matched.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub sequence: ActionSequence,
    pub score: f32,
}

/// Threshold-gated front of a [`WorkflowRepository`].
#[derive(Clone)]
pub struct ActionSequenceCache {
    repository: Arc<dyn WorkflowRepository>,
    threshold: f32,
}

impl ActionSequenceCache {
    pub fn new(repository: Arc<dyn WorkflowRepository>, threshold: f32) -> Self {
        Self {
            repository,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.repository
    }

    /// Nearest sequence for `spec_id` whose score reaches the threshold.
    pub async fn find(&self, description: &str, spec_id: &str) -> Result<Option<CacheHit>> {
        let Some((id, score)) = self.repository.find_similar(description, spec_id).await? else {
            debug!(spec_id = %spec_id, "Action-sequence cache empty for spec");
            return Ok(None);
        };

        if score < self.threshold {
            debug!(spec_id = %spec_id, score, threshold = self.threshold, "Nearest sequence below threshold");
            return Ok(None);
        }

        // The entry may have been deleted between the two calls.
        match self.repository.get_by_id(&id).await? {
            Some(sequence) => {
                debug!(spec_id = %spec_id, sequence_id = %id, score, "Action-sequence cache hit");
                Ok(Some(CacheHit { sequence, score }))
            }
            None => Ok(None),
        }
    }

    /// Append a new sequence; never mutates an existing one.
    pub async fn insert(&self, sequence: ActionSequence, description: &str) -> Result<String> {
        self.repository.insert(sequence, description).await
    }
}
