//! Error types for pipeline runs and the surrounding application
//!
//! [`PipelineError`] is the failure half of a pipeline outcome. Every
//! variant maps to a stable identifier via [`PipelineError::code`] and can be
//! turned into a sanitised, serialisable [`ErrorReport`] for display or
//! structured logging.

use crate::invoker::InvokeError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which bound a timeout refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutScope {
    /// The whole run exceeded its bound
    Run,
    /// A single stage invocation exceeded its bound
    Stage,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::Run => write!(f, "run"),
            TimeoutScope::Stage => write!(f, "stage"),
        }
    }
}

/// Failure of pipeline construction or of a single run
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("pipeline must contain at least one stage")]
    EmptyPipeline,

    #[error("invalid stage #{index}: {reason}")]
    InvalidStage { index: usize, reason: String },

    #[error("pipeline task must not be empty")]
    EmptyTask,

    #[error("stage '{stage}' (#{index}) failed: {source}")]
    StageFailed {
        stage: String,
        index: usize,
        #[source]
        source: InvokeError,
    },

    #[error("{scope} timeout of {limit:?} exceeded at stage '{stage}' (#{index})")]
    TimedOut {
        stage: String,
        index: usize,
        scope: TimeoutScope,
        limit: Duration,
    },

    #[error("run cancelled at stage '{stage}' (#{index})")]
    Cancelled { stage: String, index: usize },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PipelineError {
    /// Stable identifier for the failure kind
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::EmptyPipeline => "empty_pipeline",
            PipelineError::InvalidStage { .. } => "invalid_stage",
            PipelineError::EmptyTask => "empty_task",
            PipelineError::StageFailed { .. } => "stage_invocation_failed",
            PipelineError::TimedOut { .. } => "timeout",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::Internal { .. } => "internal_error",
        }
    }

    /// The stage this outcome identifies as the point of failure, if any
    pub fn failed_stage(&self) -> Option<(usize, &str)> {
        match self {
            PipelineError::StageFailed { stage, index, .. }
            | PipelineError::TimedOut { stage, index, .. }
            | PipelineError::Cancelled { stage, index } => Some((*index, stage.as_str())),
            _ => None,
        }
    }

    /// Build a sanitised report suitable for printing or logging
    pub fn to_report(&self) -> ErrorReport {
        let failed = self.failed_stage();
        let cause = match self {
            PipelineError::StageFailed { source, .. } => Some(source.code()),
            _ => None,
        };

        ErrorReport {
            code: self.code(),
            cause,
            stage: failed.map(|(_, name)| name.to_string()),
            stage_index: failed.map(|(index, _)| index),
            message: sanitize_error_message(&self.to_string()),
        }
    }
}

/// Serialisable summary of a failed run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorReport {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_index: Option<usize>,
    pub message: String,
}

/// Top-level error for the binary and bootstrap code
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::provider::LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for application-level operations
pub type AppResult<T> = Result<T, AppError>;

const MAX_REPORT_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("static regex")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config|\.azure)/[a-zA-Z0-9._/-]+")
        .expect("static regex")
});

/// Redact credentials and sensitive paths, cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_REPORT_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_REPORT_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}
