//! Configuration for remote providers.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for OpenAI-compatible remote providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    /// Bearer token.
    pub api_key: String,

    /// Endpoint root without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    pub model: String,

    /// Bound on one request, including reading a streamed body.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Sampling temperature applied when the request does not set one.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Sent as `OpenAI-Organization` when set.
    pub organization: Option<String>,
}

impl RemoteLlmConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: default_timeout(),
            temperature: None,
            organization: None,
        }
    }

    /// Create configuration reading the API key from an environment variable.
    pub fn from_env(
        env_var: &str,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = std::env::var(env_var)
            .map_err(|_| LlmError::ApiKeyNotFound(format!("Environment variable: {}", env_var)))?;

        Ok(Self::new(api_key, base_url, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Use a different model with otherwise identical settings.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Reject configurations that cannot possibly authenticate.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::ConfigError("api_key cannot be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(LlmError::ConfigError("model cannot be empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(LlmError::ConfigError(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_config_builder() {
        let config = RemoteLlmConfig::new("sk-copilot", "https://api.openai.com/v1", "gpt-3.5-turbo-16k")
            .with_timeout(Duration::from_secs(30))
            .with_temperature(0.0)
            .with_organization("org-copilot");

        assert_eq!(config.model, "gpt-3.5-turbo-16k");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.temperature, Some(0.0));
        assert_eq!(config.organization.as_deref(), Some("org-copilot"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_model_keeps_credentials() {
        let base = RemoteLlmConfig::new("k", "https://api.openai.com/v1", "gpt-4");
        let embed = base.clone().with_model("text-embedding-ada-002");
        assert_eq!(embed.api_key, "k");
        assert_eq!(embed.model, "text-embedding-ada-002");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RemoteLlmConfig::new("", "https://x", "m").validate().is_err());
        assert!(RemoteLlmConfig::new("k", "ftp://x", "m").validate().is_err());
        assert!(RemoteLlmConfig::new("k", "https://x", " ").validate().is_err());
    }

    #[test]
    fn test_from_env_missing_key() {
        let err = RemoteLlmConfig::from_env(
            "COPILOT_TEST_SURELY_UNSET_KEY",
            "https://api.openai.com/v1",
            "gpt-4",
        )
        .unwrap_err();
        assert!(err.is_auth_error());
    }
}
