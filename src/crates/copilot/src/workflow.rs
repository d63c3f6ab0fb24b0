//! Action sequences ("workflows") and their steps.

use crate::catalog::Catalog;
use crate::error::{CopilotError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Where a step parameter gets its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterBinding {
    /// A fixed value, usually extracted from the utterance.
    Literal { value: Value },
    /// A field of an earlier step's payload, referenced by operation id.
    StepOutput { step: String, field: String },
    /// A named field of the app-state snapshot or a caller header.
    Context { key: String },
    /// The first candidate that resolves wins.
    FirstOf { candidates: Vec<ParameterBinding> },
}

impl ParameterBinding {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn step_output(step: impl Into<String>, field: impl Into<String>) -> Self {
        Self::StepOutput {
            step: step.into(),
            field: field.into(),
        }
    }

    pub fn context(key: impl Into<String>) -> Self {
        Self::Context { key: key.into() }
    }
}

/// One bound invocation of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub operation_id: String,
    #[serde(default)]
    pub bindings: BTreeMap<String, ParameterBinding>,
    /// Failure of an optional step does not abort the sequence.
    #[serde(default)]
    pub optional: bool,
}

impl Step {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            bindings: BTreeMap::new(),
            optional: false,
        }
    }

    pub fn bind(mut self, name: impl Into<String>, binding: ParameterBinding) -> Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// An ordered, non-empty list of steps satisfying a class of requests.
///
/// Sequences are replaced whole; there is no API for editing a single step of
/// a stored sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSequence {
    pub id: String,
    pub description: String,
    pub steps: Vec<Step>,
    pub owner_spec_id: String,
    pub created_at: DateTime<Utc>,
}

impl ActionSequence {
    /// Create a sequence with a fresh id.
    pub fn new(
        description: impl Into<String>,
        owner_spec_id: impl Into<String>,
        steps: Vec<Step>,
    ) -> Result<Self> {
        if steps.is_empty() {
            return Err(CopilotError::Validation(
                "an action sequence needs at least one step".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            steps,
            owner_spec_id: owner_spec_id.into(),
            created_at: Utc::now(),
        })
    }

    /// Same content under a new id, as used by delete-then-insert replacement.
    pub fn with_new_id(mut self) -> Self {
        self.id = Uuid::new_v4().to_string();
        self.created_at = Utc::now();
        self
    }

    pub fn operation_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.operation_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fail with the offending ids if any step names an operation the
    /// catalog does not define.
    pub fn validate_against(&self, catalog: &Catalog) -> Result<()> {
        let unknown: Vec<String> = self
            .steps
            .iter()
            .filter(|s| !catalog.contains(&s.operation_id))
            .map(|s| s.operation_id.clone())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(CopilotError::UnknownOperation { ids: unknown })
        }
    }
}

/// Depth bound for [`find_field`].
const MAX_FIELD_DEPTH: usize = 4;

/// First non-null value stored under `key`. An object's own keys are checked
/// before its children; arrays are searched in order.
pub fn find_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    find_field_at(value, key, 0)
}

fn find_field_at<'a>(value: &'a Value, key: &str, depth: usize) -> Option<&'a Value> {
    if depth > MAX_FIELD_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => map
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| map.values().find_map(|v| find_field_at(v, key, depth + 1))),
        Value::Array(items) => items.iter().find_map(|v| find_field_at(v, key, depth + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperationSummary;
    use serde_json::json;

    #[test]
    fn test_empty_sequence_rejected() {
        assert!(matches!(
            ActionSequence::new("nothing", "spec", vec![]),
            Err(CopilotError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_against_catalog() {
        let catalog = Catalog::new(
            vec![],
            vec![OperationSummary::new("createCard", "post", "/cards", "Create")],
        )
        .unwrap();

        let ok = ActionSequence::new("c", "spec", vec![Step::new("createCard")]).unwrap();
        assert!(ok.validate_against(&catalog).is_ok());

        let bad = ActionSequence::new(
            "c",
            "spec",
            vec![Step::new("createCard"), Step::new("archiveCard")],
        )
        .unwrap();
        match bad.validate_against(&catalog) {
            Err(CopilotError::UnknownOperation { ids }) => assert_eq!(ids, vec!["archiveCard"]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_binding_serialization_shape() {
        let step = Step::new("createCard")
            .bind("name", ParameterBinding::literal("Demo"))
            .bind("listId", ParameterBinding::context("listId"));
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["bindings"]["name"], json!({"kind": "literal", "value": "Demo"}));
        assert_eq!(value["bindings"]["listId"], json!({"kind": "context", "key": "listId"}));

        let back: Step = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_find_field_in_nested_state() {
        let state = json!({"state": [
            {"boardId": "b1", "listId": "l1", "cardName": "Old"},
            {"boardId": "b1", "listId": "l2"}
        ]});
        assert_eq!(find_field(&state, "listId"), Some(&json!("l1")));
        assert_eq!(find_field(&state, "missing"), None);
        assert_eq!(find_field(&json!({"id": null}), "id"), None);
    }

    #[test]
    fn test_with_new_id_keeps_steps() {
        let seq = ActionSequence::new("c", "spec", vec![Step::new("a")]).unwrap();
        let replaced = seq.clone().with_new_id();
        assert_ne!(seq.id, replaced.id);
        assert_eq!(seq.steps, replaced.steps);
    }
}
