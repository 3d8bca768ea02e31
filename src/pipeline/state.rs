//! Per-run state machine
//!
//! `NotStarted -> Running(i) -> Running(i + 1) -> ... -> terminal`, where the
//! terminal state is one of `Succeeded`, `Failed(i)`, `TimedOut(i)` or
//! `Cancelled(i)`.

use crate::error::PipelineError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running { stage_index: usize },
    Succeeded,
    Failed { stage_index: usize },
    TimedOut { stage_index: usize },
    Cancelled { stage_index: usize },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::NotStarted | RunState::Running { .. })
    }

    /// Terminal state matching a run's outcome
    pub fn from_outcome<T>(outcome: &Result<T, PipelineError>) -> Self {
        match outcome {
            Ok(_) => RunState::Succeeded,
            Err(PipelineError::TimedOut { index, .. }) => RunState::TimedOut { stage_index: *index },
            Err(PipelineError::Cancelled { index, .. }) => {
                RunState::Cancelled { stage_index: *index }
            }
            Err(PipelineError::StageFailed { index, .. }) => {
                RunState::Failed { stage_index: *index }
            }
            // Rejected before the first stage started
            Err(_) => RunState::Failed { stage_index: 0 },
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        match (self, next) {
            (RunState::NotStarted, RunState::Running { stage_index: 0 }) => true,
            (RunState::NotStarted, next) => next.is_terminal(),
            (RunState::Running { stage_index: i }, RunState::Running { stage_index: j }) => {
                *j == i + 1
            }
            (RunState::Running { .. }, RunState::Succeeded) => true,
            (
                RunState::Running { stage_index: i },
                RunState::Failed { stage_index: j }
                | RunState::TimedOut { stage_index: j }
                | RunState::Cancelled { stage_index: j },
            ) => j == i || *j == i + 1,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not started"),
            RunState::Running { stage_index } => write!(f, "running stage #{stage_index}"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed { stage_index } => write!(f, "failed at stage #{stage_index}"),
            RunState::TimedOut { stage_index } => write!(f, "timed out at stage #{stage_index}"),
            RunState::Cancelled { stage_index } => write!(f, "cancelled at stage #{stage_index}"),
        }
    }
}
