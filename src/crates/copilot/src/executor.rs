//! Action-sequence execution.
//!
//! Steps run strictly in order. Each step walks
//! `Pending -> Bound -> Called -> {Succeeded | Failed}`; a step whose required
//! inputs cannot be bound fails straight from `Pending` without a network
//! call. A failed non-optional step aborts the rest of the sequence, whose
//! steps are reported as `Skipped`.

use crate::catalog::{Catalog, OperationSummary};
use crate::workflow::{find_field, ActionSequence, ParameterBinding};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Caller headers forwarded to the target API.
pub type Headers = BTreeMap<String, String>;

/// Parameter name to resolved value.
pub type BoundParameters = BTreeMap<String, Value>;

/// What the target API answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub status: u16,
    pub payload: Value,
}

impl InvocationResponse {
    pub fn new(status: u16, payload: Value) -> Self {
        Self { status, payload }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Invocation failures that produced no HTTP response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvocationError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Calls one operation of the target API.
#[async_trait]
pub trait OperationInvoker: Send + Sync {
    async fn call(
        &self,
        operation: &OperationSummary,
        params: &BoundParameters,
        headers: &Headers,
    ) -> std::result::Result<InvocationResponse, InvocationError>;
}

/// Lifecycle position of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Bound,
    Called,
    Succeeded,
    Failed,
    /// Not run because an earlier required step failed.
    Skipped,
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("missing parameter(s): {}", .names.join(", "))]
    MissingParameter { names: Vec<String> },

    #[error("timed out after {after_ms} ms: {message}")]
    Timeout { after_ms: u64, message: String },

    #[error("remote error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    RemoteError { status: Option<u16>, message: String },

    #[error("operation {operation_id} is not in the catalog")]
    UnknownOperation { operation_id: String },
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub operation_id: String,
    pub status: StepStatus,
    pub optional: bool,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub failure: Option<StepFailure>,
}

impl StepOutcome {
    fn skipped(operation_id: &str, optional: bool) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            status: StepStatus::Skipped,
            optional,
            http_status: None,
            payload: None,
            failure: None,
        }
    }

    fn to_aggregate_entry(&self) -> Value {
        let mut entry = json!({
            "operation_id": self.operation_id,
            "status": self.status,
        });
        if let Some(status) = self.http_status {
            entry["http_status"] = json!(status);
        }
        if let Some(payload) = &self.payload {
            entry["payload"] = payload.clone();
        }
        if let Some(failure) = &self.failure {
            entry["error"] = json!(failure.to_string());
        }
        entry
    }
}

/// Outcome of a whole sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True when no non-optional step failed.
    pub succeeded: bool,
    pub outcomes: Vec<StepOutcome>,
    /// Every step's outcome in step order, as JSON for the response stage.
    pub aggregate: Value,
}

impl ExecutionResult {
    fn from_outcomes(outcomes: Vec<StepOutcome>) -> Self {
        let succeeded = outcomes
            .iter()
            .all(|o| o.status == StepStatus::Succeeded || (o.optional && o.status == StepStatus::Failed));
        let aggregate = Value::Array(outcomes.iter().map(StepOutcome::to_aggregate_entry).collect());
        Self {
            succeeded,
            outcomes,
            aggregate,
        }
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.outcomes.iter().map(|o| o.status).collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Succeeded)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| o.status == StepStatus::Failed)
    }

    /// One-line human summary, used for analytics and degraded rendering.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} of {} steps succeeded",
            self.succeeded_count(),
            self.outcomes.len()
        );
        for failed in self.failures() {
            if let Some(failure) = &failed.failure {
                line.push_str(&format!("; {} failed: {}", failed.operation_id, failure));
            }
        }
        line
    }
}

/// Running data available to bindings: caller headers, the app-state
/// snapshot, and an append-only log of step outputs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    headers: Headers,
    app_state: Option<Value>,
    log: Vec<(String, Value)>,
}

impl ExecutionContext {
    pub fn new(headers: Headers, app_state: Option<Value>) -> Self {
        Self {
            headers,
            app_state,
            log: Vec::new(),
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn app_state(&self) -> Option<&Value> {
        self.app_state.as_ref()
    }

    pub fn record(&mut self, operation_id: impl Into<String>, payload: Value) {
        self.log.push((operation_id.into(), payload));
    }

    /// Latest payload recorded for an operation.
    pub fn output_of(&self, operation_id: &str) -> Option<&Value> {
        self.log
            .iter()
            .rev()
            .find(|(id, _)| id == operation_id)
            .map(|(_, payload)| payload)
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.log
    }

    pub fn resolve(&self, binding: &ParameterBinding) -> Option<Value> {
        match binding {
            ParameterBinding::Literal { value } => Some(value.clone()),
            ParameterBinding::StepOutput { step, field } => self
                .output_of(step)
                .and_then(|payload| find_field(payload, field))
                .cloned(),
            ParameterBinding::Context { key } => self
                .app_state
                .as_ref()
                .and_then(|state| find_field(state, key))
                .cloned()
                .or_else(|| {
                    self.headers
                        .iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case(key))
                        .map(|(_, v)| Value::String(v.clone()))
                }),
            ParameterBinding::FirstOf { candidates } => {
                candidates.iter().find_map(|c| self.resolve(c))
            }
        }
    }
}

enum StepState {
    Pending,
    Bound(BoundParameters),
    Called(std::result::Result<InvocationResponse, InvocationError>),
    Succeeded(InvocationResponse),
    Failed(StepFailure, Option<u16>),
}

/// Runs action sequences against an [`OperationInvoker`].
#[derive(Clone)]
pub struct SequenceExecutor {
    invoker: Arc<dyn OperationInvoker>,
    timeout: Duration,
}

impl SequenceExecutor {
    pub fn new(invoker: Arc<dyn OperationInvoker>, timeout: Duration) -> Self {
        Self { invoker, timeout }
    }

    /// Execute `sequence`. The caller's context is not modified; each run
    /// starts from a copy of it.
    pub async fn execute(
        &self,
        sequence: &ActionSequence,
        catalog: &Catalog,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let mut running = context.clone();
        let mut outcomes = Vec::with_capacity(sequence.steps.len());
        let mut aborted = false;

        for step in &sequence.steps {
            if aborted {
                outcomes.push(StepOutcome::skipped(&step.operation_id, step.optional));
                continue;
            }

            let outcome = match catalog.get(&step.operation_id) {
                Some(op) => self.run_step(op, &step.bindings, step.optional, &mut running).await,
                None => StepOutcome {
                    operation_id: step.operation_id.clone(),
                    status: StepStatus::Failed,
                    optional: step.optional,
                    http_status: None,
                    payload: None,
                    failure: Some(StepFailure::UnknownOperation {
                        operation_id: step.operation_id.clone(),
                    }),
                },
            };

            if outcome.status == StepStatus::Failed {
                if step.optional {
                    warn!(operation_id = %step.operation_id, failure = ?outcome.failure, "Optional step failed, continuing");
                } else {
                    warn!(operation_id = %step.operation_id, failure = ?outcome.failure, "Step failed, aborting sequence");
                    aborted = true;
                }
            }
            outcomes.push(outcome);
        }

        let result = ExecutionResult::from_outcomes(outcomes);
        info!(
            sequence_id = %sequence.id,
            succeeded = result.succeeded,
            steps = result.outcomes.len(),
            "Action sequence finished"
        );
        result
    }

    async fn run_step(
        &self,
        op: &OperationSummary,
        bindings: &BTreeMap<String, ParameterBinding>,
        optional: bool,
        running: &mut ExecutionContext,
    ) -> StepOutcome {
        let mut state = StepState::Pending;
        loop {
            state = match state {
                StepState::Pending => match bind(op, bindings, running) {
                    Ok(params) => StepState::Bound(params),
                    Err(failure) => StepState::Failed(failure, None),
                },
                StepState::Bound(params) => {
                    debug!(operation_id = %op.id, params = ?params.keys().collect::<Vec<_>>(), "Calling operation");
                    let call = self.invoker.call(op, &params, running.headers());
                    match tokio::time::timeout(self.timeout, call).await {
                        Ok(result) => StepState::Called(result),
                        Err(_) => StepState::Called(Err(InvocationError::Timeout(format!(
                            "no response within {:?}",
                            self.timeout
                        )))),
                    }
                }
                StepState::Called(Ok(response)) if response.is_success() => {
                    StepState::Succeeded(response)
                }
                StepState::Called(Ok(response)) => {
                    let message = match &response.payload {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    StepState::Failed(
                        StepFailure::RemoteError {
                            status: Some(response.status),
                            message,
                        },
                        Some(response.status),
                    )
                }
                StepState::Called(Err(InvocationError::Timeout(message))) => StepState::Failed(
                    StepFailure::Timeout {
                        after_ms: self.timeout.as_millis() as u64,
                        message,
                    },
                    None,
                ),
                StepState::Called(Err(e)) => StepState::Failed(
                    StepFailure::RemoteError {
                        status: None,
                        message: e.to_string(),
                    },
                    None,
                ),
                StepState::Succeeded(response) => {
                    info!(operation_id = %op.id, status = response.status, "Step succeeded");
                    running.record(op.id.clone(), response.payload.clone());
                    return StepOutcome {
                        operation_id: op.id.clone(),
                        status: StepStatus::Succeeded,
                        optional,
                        http_status: Some(response.status),
                        payload: Some(response.payload),
                        failure: None,
                    };
                }
                StepState::Failed(failure, http_status) => {
                    return StepOutcome {
                        operation_id: op.id.clone(),
                        status: StepStatus::Failed,
                        optional,
                        http_status,
                        payload: None,
                        failure: Some(failure),
                    };
                }
            };
        }
    }
}

fn bind(
    op: &OperationSummary,
    bindings: &BTreeMap<String, ParameterBinding>,
    context: &ExecutionContext,
) -> std::result::Result<BoundParameters, StepFailure> {
    let params: BoundParameters = bindings
        .iter()
        .filter_map(|(name, binding)| context.resolve(binding).map(|v| (name.clone(), v)))
        .collect();

    let missing: Vec<String> = op
        .required_inputs()
        .into_iter()
        .filter(|name| !params.contains_key(*name))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(params)
    } else {
        Err(StepFailure::MissingParameter { names: missing })
    }
}
