//! Property tests for synthesis order and the cache acceptance threshold.

use async_trait::async_trait;
use copilot::cache::ActionSequenceCache;
use copilot::synthesizer::SynthesisContext;
use copilot::{
    ActionSequence, ActionSequenceSynthesizer, Catalog, OperationSummary, Step, WorkflowRepository,
};
use proptest::prelude::*;
use std::sync::Arc;

const OPERATION_IDS: [&str; 6] = [
    "getBoard",
    "getLists",
    "createCard",
    "updateCard",
    "deleteCard",
    "addMember",
];

fn catalog() -> Catalog {
    Catalog::new(
        vec![],
        OPERATION_IDS
            .iter()
            .map(|id| OperationSummary::new(*id, "post", format!("/{}", id), *id))
            .collect(),
    )
    .unwrap()
}

/// Reports one stored sequence at a fixed score.
struct FixedScoreRepository {
    sequence: ActionSequence,
    score: f32,
}

#[async_trait]
impl WorkflowRepository for FixedScoreRepository {
    async fn get_by_id(&self, id: &str) -> copilot::Result<Option<ActionSequence>> {
        Ok((id == self.sequence.id).then(|| self.sequence.clone()))
    }

    async fn find_similar(
        &self,
        _description: &str,
        _spec_id: &str,
    ) -> copilot::Result<Option<(String, f32)>> {
        Ok(Some((self.sequence.id.clone(), self.score)))
    }

    async fn insert(&self, sequence: ActionSequence, _description: &str) -> copilot::Result<String> {
        Ok(sequence.id)
    }

    async fn delete(&self, _id: &str) -> copilot::Result<bool> {
        Ok(false)
    }

    async fn list_by_spec(&self, _spec_id: &str) -> copilot::Result<Vec<ActionSequence>> {
        Ok(vec![self.sequence.clone()])
    }
}

proptest! {
    #[test]
    fn prop_synthesis_preserves_count_and_order(
        ids in prop::sample::subsequence(OPERATION_IDS.to_vec(), 1..=OPERATION_IDS.len())
            .prop_shuffle(),
    ) {
        let ids: Vec<String> = ids.into_iter().map(str::to_string).collect();
        let ctx = SynthesisContext {
            utterance: "do the thing",
            spec_id: "trello",
            app_state: None,
        };

        let sequence = ActionSequenceSynthesizer::new()
            .synthesize(&ids, &catalog(), &ctx)
            .unwrap();

        prop_assert_eq!(sequence.len(), ids.len());
        prop_assert_eq!(sequence.operation_ids(), ids);
    }

    #[test]
    fn prop_cache_never_returns_below_threshold(
        score in 0.0f32..=1.0,
        threshold in 0.01f32..=1.0,
    ) {
        let sequence = ActionSequence::new("create a card", "trello", vec![Step::new("createCard")]).unwrap();
        let cache = ActionSequenceCache::new(
            Arc::new(FixedScoreRepository { sequence, score }),
            threshold,
        );

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let hit = runtime.block_on(cache.find("create a card", "trello")).unwrap();

        match hit {
            Some(hit) => prop_assert!(hit.score >= threshold),
            None => prop_assert!(score < threshold),
        }
    }
}
