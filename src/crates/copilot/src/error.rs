//! Error types for the orchestration core.

use thiserror::Error;

/// Result type for copilot operations.
pub type Result<T> = std::result::Result<T, CopilotError>;

/// Errors that can occur while handling a turn.
///
/// Per-step failures during execution are not errors; they are carried as
/// [`StepFailure`](crate::executor::StepFailure) values inside the
/// [`ExecutionResult`](crate::executor::ExecutionResult).
#[derive(Debug, Error)]
pub enum CopilotError {
    /// Malformed input to the core (empty utterance, empty catalog, oversized text).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The classifier proposed operation ids absent from the catalog.
    #[error("Unknown operation ids: {}", .ids.join(", "))]
    UnknownOperation { ids: Vec<String> },

    /// Classification, generation or embedding backend unreachable.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The API specification could not be read into a catalog.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Action-sequence or history persistence failed.
    #[error("Store error: {0}")]
    Store(String),

    /// App-state snapshot could not be fetched.
    #[error("App state error: {0}")]
    AppState(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CopilotError {
    /// Errors worth retrying for idempotent fetches.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CopilotError::ProviderUnavailable(_)
                | CopilotError::AppState(_)
                | CopilotError::Store(_)
                | CopilotError::Io(_)
        )
    }
}

impl From<llm::LlmError> for CopilotError {
    fn from(err: llm::LlmError) -> Self {
        if err.is_auth_error() {
            CopilotError::Config(err.to_string())
        } else {
            CopilotError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for CopilotError {
    fn from(err: serde_yaml::Error) -> Self {
        CopilotError::Catalog(format!("YAML: {}", err))
    }
}
