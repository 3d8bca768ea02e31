//! Pipeline configuration
//!
//! A pipeline is described entirely by data: the `[[stages]]` array fixes
//! stage order and personas, `[llm]` selects the backend every stage talks
//! to, and `[pipeline]` carries the run bounds. Secrets are never stored in
//! the file; only the names of the environment variables holding them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub pipeline: PipelineSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// `[pipeline]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Pipeline identifier (must match [a-zA-Z0-9._-]+)
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Bound on the whole run, in seconds
    pub timeout_secs: Option<u64>,
    /// Bound on each individual stage invocation, in seconds
    pub stage_timeout_secs: Option<u64>,
}

/// Supported chat-completion backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

/// `[llm]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    pub provider: ProviderKind,
    /// Model identifier (for Azure, the deployment name unless `deployment` is set)
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    /// Literal endpoint URL; takes precedence over `endpoint_env`
    pub endpoint: Option<String>,
    /// Environment variable containing the endpoint URL
    pub endpoint_env: Option<String>,
    /// Azure deployment name
    pub deployment: Option<String>,
    /// Azure REST API version
    pub api_version: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// HTTP timeout for a single provider request (default: 60)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// One `[[stages]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    pub name: String,
    pub instructions: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid pipeline name: {0}")]
    InvalidPipelineName(String),
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_pipeline_name(&self.pipeline.name)?;

        if self.stages.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[stages]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "stage #{index} has a blank name"
                )));
            }
            if stage.instructions.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "stage '{}' has blank instructions",
                    stage.name
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }

        for (field, value) in [
            ("timeout_secs", self.pipeline.timeout_secs),
            ("stage_timeout_secs", self.pipeline.stage_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "pipeline.{field} must be greater than zero"
                )));
            }
        }

        self.llm.validate()
    }

    /// Whole-run bound
    pub fn run_timeout(&self) -> Option<Duration> {
        self.pipeline.timeout_secs.map(Duration::from_secs)
    }

    /// Per-stage bound
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.pipeline.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[pipeline]
name = "test-pipeline"
description = "A test pipeline"
timeout_secs = 60

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"

[[stages]]
name = "Analyzer"
instructions = "Analyze the post."

[[stages]]
name = "Reviewer"
instructions = "Review the post."
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl LlmSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("llm.model is required".to_string()));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "llm.api_key_env is required".to_string(),
            ));
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidConfig(format!(
                    "llm.temperature {temperature} is outside 0.0..=2.0"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "llm.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint(endpoint)?;
        }

        if self.provider == ProviderKind::AzureOpenAi {
            if self.endpoint.is_none() && self.endpoint_env.is_none() {
                return Err(ConfigError::InvalidConfig(
                    "azure_openai requires llm.endpoint or llm.endpoint_env".to_string(),
                ));
            }
            if self.api_version.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(ConfigError::InvalidConfig(
                    "azure_openai requires llm.api_version".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Resolve the API key from its environment variable
    pub fn api_key(&self) -> Result<String, ConfigError> {
        get_env_var_required(&self.api_key_env)
    }

    /// Resolve the endpoint: literal first, then `endpoint_env`, else none
    pub fn endpoint(&self) -> Result<Option<String>, ConfigError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(Some(endpoint.clone()));
        }
        match &self.endpoint_env {
            Some(name) => {
                let endpoint = get_env_var_required(name)?;
                validate_endpoint(&endpoint)?;
                Ok(Some(endpoint))
            }
            None => Ok(None),
        }
    }
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

/// Endpoints must be absolute http(s) URLs
fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let parsed = url::Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

fn validate_pipeline_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidPipelineName(format!(
            "Pipeline name '{name}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
