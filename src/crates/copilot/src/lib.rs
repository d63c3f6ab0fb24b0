//! Intent-to-action orchestration engine.
//!
//! A turn flows through these stages in order:
//!
//! 1. [`catalog`] - the target API's operations, read from an OpenAPI document.
//! 2. [`intent`] - a chat model decides whether the utterance needs zero, one
//!    or several operations.
//! 3. [`cache`] / [`synthesizer`] - a semantically similar stored action
//!    sequence is reused, or a new one is built from the selected operations.
//! 4. [`executor`] - steps run in order against an [`executor::OperationInvoker`],
//!    with per-step failure isolation.
//! 5. [`response`] - results are summarized back into text, optionally streamed.
//!
//! [`engine::CopilotEngine`] wires the stages together. App-state snapshots
//! ([`app_state`]) and chat history ([`history`]) are injected collaborators.
//!
//! # Example
//!
//! ```rust,ignore
//! use copilot::{Catalog, CopilotEngine, EngineConfig, TurnRequest};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(Catalog::from_file("trello.yaml")?);
//! let engine = CopilotEngine::new(chat, repository, invoker, &EngineConfig::default());
//! let response = engine
//!     .handle_turn(TurnRequest::new("create a card named Demo", "session-1", "trello", catalog))
//!     .await;
//! println!("{}", response.text);
//! ```

pub mod app_state;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod intent;
pub mod invoker;
pub mod prompts;
pub mod response;
pub mod retry;
pub mod synthesizer;
pub mod workflow;

pub use app_state::{AppStateCache, AppStateProvider, AppStateProviders, TrelloStateProvider};
pub use cache::{ActionSequenceCache, InMemoryWorkflowRepository, WorkflowRepository};
pub use catalog::{Catalog, OperationSummary, ParamLocation};
pub use config::EngineConfig;
pub use engine::{CopilotEngine, TurnRequest, TurnResponse};
pub use error::{CopilotError, Result};
pub use executor::{
    ExecutionContext, ExecutionResult, Headers, OperationInvoker, SequenceExecutor, StepFailure,
    StepStatus,
};
pub use history::{ChatRole, HistorySink, InMemoryHistory};
pub use intent::{IntentDecision, IntentResolver, PolicyDocument};
pub use invoker::HttpOperationInvoker;
pub use response::ResponseSynthesizer;
pub use retry::RetryConfig;
pub use synthesizer::ActionSequenceSynthesizer;
pub use workflow::{ActionSequence, ParameterBinding, Step};
