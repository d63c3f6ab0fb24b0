//! Engine configuration.
//!
//! Settings are read from a YAML, JSON or TOML file (format picked by
//! extension), then overridden by `COPILOT_*` environment variables, then
//! validated.
//!
//! # Example
//!
//! ```rust,ignore
//! use copilot::config::EngineConfig;
//!
//! let config = EngineConfig::from_file("copilot.yaml")?
//!     .apply_env_overrides()?;
//! config.validate()?;
//! ```

use crate::error::{CopilotError, Result};
use crate::retry::RetryConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum similarity for reusing a cached action sequence.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Age after which an app-state snapshot is refetched.
    #[serde(default = "default_app_state_freshness_secs")]
    pub app_state_freshness_secs: u64,

    /// Bound on each operation invocation.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Bound on each provider request.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_chat_model")]
    pub classifier_model: String,

    #[serde(default = "default_chat_model")]
    pub summarizer_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,

    /// Environment variable holding the provider API key.
    #[serde(default = "default_provider_api_key_env")]
    pub provider_api_key_env: String,

    /// Optional per-app constraints document.
    #[serde(default)]
    pub policy_path: Option<PathBuf>,

    #[serde(default)]
    pub app_state_retry: RetryConfig,
}

fn default_similarity_threshold() -> f32 {
    0.9
}

fn default_app_state_freshness_secs() -> u64 {
    600
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo-16k".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_provider_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            app_state_freshness_secs: default_app_state_freshness_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            classifier_model: default_chat_model(),
            summarizer_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            provider_base_url: default_provider_base_url(),
            provider_api_key_env: default_provider_api_key_env(),
            policy_path: None,
            app_state_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config_file(path)
    }

    /// Apply `COPILOT_*` environment overrides.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production).
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("COPILOT_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = parse_override("COPILOT_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("COPILOT_OPERATION_TIMEOUT_SECS") {
            self.operation_timeout_secs = parse_override("COPILOT_OPERATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("COPILOT_CLASSIFIER_MODEL") {
            self.classifier_model = v;
        }
        if let Some(v) = lookup("COPILOT_SUMMARIZER_MODEL") {
            self.summarizer_model = v;
        }
        if let Some(v) = lookup("COPILOT_PROVIDER_BASE_URL") {
            self.provider_base_url = v;
        }
        if let Some(v) = lookup("COPILOT_POLICY_PATH") {
            self.policy_path = Some(PathBuf::from(v));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(CopilotError::Config(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.app_state_freshness_secs == 0 {
            return Err(CopilotError::Config(
                "app_state_freshness_secs must be positive".to_string(),
            ));
        }
        if self.operation_timeout_secs == 0 || self.provider_timeout_secs == 0 {
            return Err(CopilotError::Config("timeouts must be positive".to_string()));
        }
        for (name, model) in [
            ("classifier_model", &self.classifier_model),
            ("summarizer_model", &self.summarizer_model),
            ("embedding_model", &self.embedding_model),
        ] {
            if model.trim().is_empty() {
                return Err(CopilotError::Config(format!("{} cannot be empty", name)));
            }
        }
        self.app_state_retry.validate()
    }

    pub fn app_state_freshness(&self) -> Duration {
        Duration::from_secs(self.app_state_freshness_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| CopilotError::Config(format!("Failed to parse {}='{}': {}", key, raw, e)))
}

/// Load any deserializable file, picking the format from the extension.
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| {
            CopilotError::Config(format!("Unable to determine file extension for {:?}", path))
        })?;
    let content = std::fs::read_to_string(path)?;

    let parsed = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(&content).map_err(|e| e.to_string()),
        "toml" => toml::from_str(&content).map_err(|e| e.to_string()),
        other => {
            return Err(CopilotError::Config(format!(
                "Unsupported config file extension: {}",
                other
            )))
        }
    };
    parsed.map_err(|e| CopilotError::Config(format!("Failed to parse {:?}: {}", path, e)))
}
