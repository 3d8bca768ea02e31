//! LLM provider abstraction layer
//!
//! This module provides a provider-agnostic interface for chat-completion
//! backends (OpenAI, Azure OpenAI, Anthropic) plus a factory that builds
//! the configured provider.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;

use crate::config::{LlmSection, ProviderKind};
use std::sync::Arc;
use std::time::Duration;

/// Build the provider described by the `[llm]` section, resolving secrets
/// from the environment
pub fn create_provider(llm: &LlmSection) -> Result<Arc<dyn LlmProvider>, crate::error::AppError> {
    let api_key = llm.api_key()?;
    let timeout = Duration::from_secs(llm.request_timeout_secs);

    let provider: Arc<dyn LlmProvider> = match llm.provider {
        ProviderKind::OpenAi => {
            let mut config = OpenAiConfig {
                api_key,
                timeout,
                ..Default::default()
            };
            if let Some(endpoint) = llm.endpoint()? {
                config.base_url = endpoint;
            }
            Arc::new(OpenAiProvider::new(config)?)
        }
        ProviderKind::AzureOpenAi => {
            let endpoint = llm.endpoint()?.ok_or_else(|| {
                crate::config::ConfigError::InvalidConfig(
                    "azure_openai requires an endpoint".to_string(),
                )
            })?;
            let api_version = llm.api_version.clone().unwrap_or_default();
            let deployment = llm.deployment.clone().unwrap_or_else(|| llm.model.clone());
            let mut config = OpenAiConfig::azure(api_key, endpoint, deployment, api_version);
            config.timeout = timeout;
            Arc::new(OpenAiProvider::new(config)?)
        }
        ProviderKind::Anthropic => {
            let mut config = AnthropicConfig {
                api_key,
                timeout,
                ..Default::default()
            };
            if let Some(endpoint) = llm.endpoint()? {
                config.base_url = endpoint;
            }
            Arc::new(AnthropicProvider::new(config)?)
        }
    };

    Ok(provider)
}
