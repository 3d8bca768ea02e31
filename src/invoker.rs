//! Agent invoker abstraction
//!
//! The pipeline core depends on exactly one capability: send a persona plus
//! an input text to some agent and get a text reply back. Everything about
//! how that happens (HTTP, credentials, retries, tool dispatch) lives behind
//! this trait.

use crate::llm::provider::{CompletionRequest, LlmError, LlmProvider, Message};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Capability that turns `(instructions, input)` into a text reply
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str {
        "agent"
    }

    /// Submit one input under the given persona
    async fn invoke(&self, instructions: &str, input: &str) -> Result<String, InvokeError>;
}

/// Failures an invoker may report. The runner treats every variant the same
/// way: the stage failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvokeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Other(String),
}

impl InvokeError {
    /// Stable identifier for the failure kind
    pub fn code(&self) -> &'static str {
        match self {
            InvokeError::Transport(_) => "transport_error",
            InvokeError::Authentication(_) => "authentication_error",
            InvokeError::RateLimited(_) => "rate_limited",
            InvokeError::MalformedResponse(_) => "malformed_response",
            InvokeError::Other(_) => "invoker_error",
        }
    }
}

impl From<LlmError> for InvokeError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::NetworkError(m) | LlmError::RequestFailed(m) => InvokeError::Transport(m),
            LlmError::AuthenticationFailed(m) | LlmError::NotConfigured(m) => {
                InvokeError::Authentication(m)
            }
            LlmError::RateLimitExceeded(m) => InvokeError::RateLimited(m),
            LlmError::InvalidResponse(m) => InvokeError::MalformedResponse(m),
            other @ (LlmError::ModelNotFound(_)
            | LlmError::InvalidRequest(_)
            | LlmError::ApiError(_)) => InvokeError::Other(other.to_string()),
        }
    }
}

/// Adapts an [`LlmProvider`] into an [`AgentInvoker`]: the stage persona
/// becomes the system message and the stage input the user message.
pub struct LlmInvoker {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmInvoker {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build the chat request for one stage call (pure)
    fn build_request(&self, instructions: &str, input: &str) -> CompletionRequest {
        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(instructions), Message::user(input)],
        );
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

#[async_trait]
impl AgentInvoker for LlmInvoker {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn invoke(&self, instructions: &str, input: &str) -> Result<String, InvokeError> {
        let request = self.build_request(instructions, input);
        let response = self.provider.complete(request).await?;

        debug!(
            provider = self.provider.name(),
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "Agent reply received"
        );

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(InvokeError::MalformedResponse(format!(
                "{} returned no text content (finish_reason: {:?})",
                self.provider.name(),
                response.finish_reason
            ))),
        }
    }
}
