use crate::ConfigurationError;
use aide_llm::PriceTable;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime configuration for turn and subagent execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub lock_ttl_ms: u64,
    pub max_generation_steps: usize,
    pub max_subagent_steps: usize,
    pub max_retries: u32,
    pub primary_agent: String,
    pub default_model: Option<String>,
    pub default_temperature: Option<f32>,
    /// Provider slugs that are never valid routing preferences.
    pub invalid_provider_slugs: Vec<String>,
    pub pricing: PriceTable,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 120_000,
            max_generation_steps: 10,
            max_subagent_steps: 5,
            max_retries: 2,
            primary_agent: "assistant".to_string(),
            default_model: None,
            default_temperature: None,
            invalid_provider_slugs: default_invalid_provider_slugs(),
            pricing: PriceTable::default(),
        }
    }
}

pub fn default_invalid_provider_slugs() -> Vec<String> {
    ["auto", "default", "openrouter", "none"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl AgentConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            toml::from_str(raw).map_err(|err| ConfigurationError::Invalid(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ConfigurationError::Invalid(format!("read {} failed: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.lock_ttl_ms == 0 {
            return Err(ConfigurationError::Invalid(
                "lock_ttl_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_generation_steps == 0 || self.max_subagent_steps == 0 {
            return Err(ConfigurationError::Invalid(
                "step limits must be greater than zero".to_string(),
            ));
        }
        if self.primary_agent.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "primary_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_invalid_provider_slug(&self, slug: &str) -> bool {
        let slug = slug.trim();
        slug.is_empty()
            || self
                .invalid_provider_slugs
                .iter()
                .any(|invalid| invalid.eq_ignore_ascii_case(slug))
    }
}
