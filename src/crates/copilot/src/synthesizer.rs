//! Builds action sequences from classifier-selected operation ids.
//!
//! Step order is exactly the order the ids were supplied in. Bindings are
//! filled, per operation input, from (in precedence order) a literal in the
//! utterance, the outputs of earlier steps (latest first), and the app-state
//! snapshot.
//! Inputs none of these can supply stay unbound; the executor reports them
//! as missing parameters.

use crate::catalog::{Catalog, OperationSummary};
use crate::error::{CopilotError, Result};
use crate::workflow::{find_field, ActionSequence, ParameterBinding, Step};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Inputs populated by "named X" / "called X" phrases.
const NAME_LIKE_INPUTS: [&str; 5] = ["name", "title", "displayname", "label", "fullname"];

static NAME_PHRASE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:named|called|titled)\s+(?:"([^"]*)"|'([^']*)'|([^\s,;.!?]+))"#).ok()
});

/// Per-turn data available while binding.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisContext<'a> {
    pub utterance: &'a str,
    pub spec_id: &'a str,
    pub app_state: Option<&'a Value>,
}

#[derive(Debug, Default, Clone)]
pub struct ActionSequenceSynthesizer;

impl ActionSequenceSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// One step per id, in input order.
    ///
    /// Fails only when an id is not in the catalog.
    pub fn synthesize(
        &self,
        operation_ids: &[String],
        catalog: &Catalog,
        ctx: &SynthesisContext<'_>,
    ) -> Result<ActionSequence> {
        if operation_ids.is_empty() {
            return Err(CopilotError::Validation(
                "cannot synthesize a sequence from no operations".to_string(),
            ));
        }

        let unknown: Vec<String> = catalog
            .unknown_ids(operation_ids)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(CopilotError::UnknownOperation { ids: unknown });
        }

        let mut steps = Vec::with_capacity(operation_ids.len());
        for (pos, id) in operation_ids.iter().enumerate() {
            let earlier: Vec<&str> = operation_ids[..pos].iter().map(String::as_str).collect();
            steps.push(self.build_step(catalog, id, &earlier, false, ctx)?);
        }

        let sequence = ActionSequence::new(ctx.utterance, ctx.spec_id, steps)?;
        debug!(
            spec_id = %ctx.spec_id,
            sequence_id = %sequence.id,
            steps = sequence.len(),
            "Synthesized action sequence"
        );
        Ok(sequence)
    }

    /// Recompute the bindings of a stored sequence for a new utterance.
    ///
    /// Keeps id, step order and optional flags. Fails with
    /// [`CopilotError::UnknownOperation`] if the catalog no longer defines a
    /// step's operation.
    pub fn rebind(
        &self,
        sequence: &ActionSequence,
        catalog: &Catalog,
        ctx: &SynthesisContext<'_>,
    ) -> Result<ActionSequence> {
        sequence.validate_against(catalog)?;

        let mut rebound = sequence.clone();
        for pos in 0..rebound.steps.len() {
            let earlier: Vec<&str> = sequence.steps[..pos]
                .iter()
                .map(|s| s.operation_id.as_str())
                .collect();
            let step = &sequence.steps[pos];
            rebound.steps[pos] =
                self.build_step(catalog, &step.operation_id, &earlier, step.optional, ctx)?;
        }
        Ok(rebound)
    }

    fn build_step(
        &self,
        catalog: &Catalog,
        operation_id: &str,
        earlier: &[&str],
        optional: bool,
        ctx: &SynthesisContext<'_>,
    ) -> Result<Step> {
        let op = catalog
            .get(operation_id)
            .ok_or_else(|| CopilotError::UnknownOperation {
                ids: vec![operation_id.to_string()],
            })?;

        let bindings = bind_inputs(op, earlier, ctx);
        Ok(Step {
            operation_id: operation_id.to_string(),
            bindings,
            optional,
        })
    }
}

/// `earlier` holds the operation ids of the preceding steps, in step order.
fn bind_inputs(
    op: &OperationSummary,
    earlier: &[&str],
    ctx: &SynthesisContext<'_>,
) -> BTreeMap<String, ParameterBinding> {
    let mut bindings = BTreeMap::new();

    for name in op.input_names() {
        if let Some(value) = extract_literal(ctx.utterance, name) {
            bindings.insert(name.to_string(), ParameterBinding::Literal { value });
            continue;
        }

        let mut candidates = Vec::new();
        for (pos, prior) in earlier.iter().enumerate().rev() {
            // A repeated operation only offers its latest output.
            if earlier[pos + 1..].contains(prior) {
                continue;
            }
            candidates.push(ParameterBinding::step_output(*prior, name));
        }
        if ctx.app_state.and_then(|s| find_field(s, name)).is_some() {
            candidates.push(ParameterBinding::context(name));
        }

        match candidates.len() {
            0 => {}
            1 => {
                bindings.insert(name.to_string(), candidates.remove(0));
            }
            _ => {
                bindings.insert(name.to_string(), ParameterBinding::FirstOf { candidates });
            }
        }
    }

    bindings
}

/// Value the utterance states for `name`, if any.
///
/// Recognises `name=value`, `name: value` and, for name-like inputs,
/// `named X` / `called X` / `titled X`. Quoted values may contain spaces.
pub fn extract_literal(utterance: &str, name: &str) -> Option<Value> {
    let keyed = Regex::new(&format!(
        r#"(?i)\b{}\s*[:=]\s*(?:"([^"]*)"|'([^']*)'|([^\s,;]+))"#,
        regex::escape(name)
    ))
    .ok()?;
    if let Some(raw) = first_capture(&keyed, utterance) {
        return Some(to_json_value(&raw));
    }

    if NAME_LIKE_INPUTS.contains(&name.to_lowercase().as_str()) {
        let phrase = NAME_PHRASE.as_ref()?;
        if let Some(raw) = first_capture(phrase, utterance) {
            return Some(Value::String(raw));
        }
    }

    None
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    (1..caps.len())
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string())
}

fn to_json_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
