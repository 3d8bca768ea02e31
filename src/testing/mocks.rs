//! Mock implementations for testing
//!
//! Deterministic stand-ins for the agent invoker, the LLM provider and
//! stage observers, so pipelines can be exercised without network access.

use crate::invoker::{AgentInvoker, InvokeError};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::pipeline::{StageObserver, StageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded call to [`MockInvoker::invoke`]
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    pub instructions: String,
    pub input: String,
}

type Handler = dyn Fn(usize, &str, &str) -> Result<String, InvokeError> + Send + Sync;

/// Scriptable agent invoker
pub struct MockInvoker {
    handler: Arc<Handler>,
    delay: Option<Duration>,
    calls: Mutex<Vec<InvocationRecord>>,
}

impl MockInvoker {
    /// Reply with `handler(call_index, instructions, input)`
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(usize, &str, &str) -> Result<String, InvokeError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `prefix` followed by the input
    pub fn echo_with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::from_fn(move |_, _, input| Ok(format!("{prefix}{input}")))
    }

    /// Reply with the given texts in turn, cycling when exhausted
    pub fn responses(responses: Vec<String>) -> Self {
        Self::from_fn(move |call, _, _| {
            if responses.is_empty() {
                Ok("Mock response".to_string())
            } else {
                Ok(responses[call % responses.len()].clone())
            }
        })
    }

    /// Fail every call with `error`
    pub fn failing(error: InvokeError) -> Self {
        Self::from_fn(move |_, _, _| Err(error.clone()))
    }

    /// Echo with `prefix`, except that call number `call` fails with `error`
    pub fn failing_on_call(prefix: impl Into<String>, call: usize, error: InvokeError) -> Self {
        let prefix = prefix.into();
        Self::from_fn(move |n, _, input| {
            if n == call {
                Err(error.clone())
            } else {
                Ok(format!("{prefix}{input}"))
            }
        })
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<InvocationRecord> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl AgentInvoker for MockInvoker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, instructions: &str, input: &str) -> Result<String, InvokeError> {
        let call = {
            let mut calls = lock(&self.calls);
            calls.push(InvocationRecord {
                instructions: instructions.to_string(),
                input: input.to_string(),
            });
            calls.len() - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.handler)(call, instructions, input)
    }
}

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub should_fail: bool,
    requests: tokio::sync::Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            should_fail: false,
            requests: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Requests received so far, in order
    pub async fn get_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let call = {
            let mut requests = self.requests.lock().await;
            requests.push(request);
            requests.len() - 1
        };

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[call % self.responses.len()].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Observer notification, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Started { index: usize, stage: String },
    Completed { index: usize, stage: String, output: String },
}

/// Observer that keeps every notification for later assertions
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    results: Mutex<Vec<StageResult>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        lock(&self.events).clone()
    }

    pub fn results(&self) -> Vec<StageResult> {
        lock(&self.results).clone()
    }

    /// `(index, stage)` for every started notification
    pub fn started(&self) -> Vec<(usize, String)> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Started { index, stage } => Some((*index, stage.clone())),
                ObservedEvent::Completed { .. } => None,
            })
            .collect()
    }

    /// `(stage, output)` for every completed notification
    pub fn completed(&self) -> Vec<(String, String)> {
        lock(&self.results)
            .iter()
            .map(|r| (r.stage_name.clone(), r.output.clone()))
            .collect()
    }
}

impl StageObserver for RecordingObserver {
    fn on_stage_result(&self, result: &StageResult) {
        lock(&self.events).push(ObservedEvent::Completed {
            index: result.stage_index,
            stage: result.stage_name.clone(),
            output: result.output.clone(),
        });
        lock(&self.results).push(result.clone());
    }

    fn on_stage_started(&self, index: usize, stage_name: &str) {
        lock(&self.events).push(ObservedEvent::Started {
            index,
            stage: stage_name.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_invoker_records_calls() {
        let invoker = MockInvoker::responses(vec!["one".into(), "two".into()]);

        assert_eq!(invoker.invoke("p", "a").await.unwrap(), "one");
        assert_eq!(invoker.invoke("p", "b").await.unwrap(), "two");
        assert_eq!(invoker.invoke("p", "c").await.unwrap(), "one");

        assert_eq!(invoker.call_count(), 3);
        assert_eq!(invoker.calls()[1].input, "b");
    }

    #[tokio::test]
    async fn test_failing_on_call() {
        let invoker =
            MockInvoker::failing_on_call("X:", 1, InvokeError::Transport("reset".into()));

        assert_eq!(invoker.invoke("p", "a").await.unwrap(), "X:a");
        assert!(invoker.invoke("p", "b").await.is_err());
        assert_eq!(invoker.invoke("p", "c").await.unwrap(), "X:c");
    }

    #[tokio::test]
    async fn test_mock_provider_cycles_and_records() {
        let provider = MockLlmProvider::new(vec!["a".into(), "b".into()]);
        let request = CompletionRequest::new("mock-model", vec![]);

        let first = provider.complete(request.clone()).await.unwrap();
        let second = provider.complete(request).await.unwrap();

        assert_eq!(first.content.as_deref(), Some("a"));
        assert_eq!(second.content.as_deref(), Some("b"));
        assert_eq!(provider.get_requests().await.len(), 2);
    }

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.on_stage_started(0, "Analyzer");
        observer.on_stage_result(&StageResult {
            stage_name: "Analyzer".into(),
            stage_index: 0,
            output: "A:x".into(),
            duration: Duration::from_millis(1),
            completed_at: chrono::Utc::now(),
        });

        assert_eq!(observer.events().len(), 2);
        assert_eq!(observer.started(), vec![(0, "Analyzer".to_string())]);
        assert_eq!(
            observer.completed(),
            vec![("Analyzer".to_string(), "A:x".to_string())]
        );
    }
}
