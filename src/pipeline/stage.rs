//! Pipeline stages and their results

use crate::invoker::{AgentInvoker, InvokeError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// One named step of a sequential pipeline: a fixed persona bound to an
/// invoker. Immutable and cheap to clone; safe to share across runs.
#[derive(Clone)]
pub struct PipelineStage {
    name: String,
    instructions: String,
    invoker: Arc<dyn AgentInvoker>,
}

impl PipelineStage {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            invoker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Run this stage's persona over `input`
    pub async fn invoke(&self, input: &str) -> Result<String, InvokeError> {
        let span = crate::stage_span!(stage = %self.name, invoker = self.invoker.name());
        self.invoker
            .invoke(&self.instructions, input)
            .instrument(span)
            .await
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("invoker", &self.invoker.name())
            .finish()
    }
}

/// Output of one successfully executed stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage_name: String,
    pub stage_index: usize,
    pub output: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
