//! In-process runtime hosting pipeline runs
//!
//! The runtime owns the lifecycle that runs execute within: it must be
//! started before runs are submitted, every run is spawned onto a tracked
//! task, and shutdown either cancels in-flight runs (`stop`) or waits for
//! them to drain (`stop_when_idle`).

use crate::error::{PipelineError, TimeoutScope};
use crate::pipeline::{PipelineOutcome, RunOptions, RunState, SequentialPipeline};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("runtime has not been started")]
    NotStarted,
    #[error("runtime is stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Created,
    Running,
    Stopped,
}

/// Hosts concurrent pipeline runs
pub struct AgentRuntime {
    status: Mutex<Status>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(Status::Created),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn status(&self) -> Status {
        match self.status.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_status(&self, status: Status) {
        match self.status.lock() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// Open the runtime for new runs. Starting twice is a no-op; a stopped
    /// runtime cannot be restarted.
    pub fn start(&self) -> Result<(), RuntimeError> {
        match self.status() {
            Status::Created => {
                self.set_status(Status::Running);
                info!("Agent runtime started");
                Ok(())
            }
            Status::Running => Ok(()),
            Status::Stopped => Err(RuntimeError::Stopped),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    /// Number of runs still executing
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn a run. The runtime links its own shutdown token with the one
    /// in `options`; cancelling either stops the run.
    pub fn invoke(
        &self,
        pipeline: Arc<SequentialPipeline>,
        task: impl Into<String>,
        options: RunOptions,
    ) -> Result<RunHandle, RuntimeError> {
        match self.status() {
            Status::Created => return Err(RuntimeError::NotStarted),
            Status::Stopped => return Err(RuntimeError::Stopped),
            Status::Running => {}
        }

        let run_id = Uuid::new_v4();
        let task = task.into();
        let external = options.cancellation().clone();
        let run_token = self.shutdown.child_token();
        let options = options.with_cancellation(run_token.clone());
        let (state_tx, state_rx) = watch::channel(RunState::NotStarted);

        debug!(run_id = %run_id, pipeline = %pipeline.name(), "Submitting pipeline run");

        let run_pipeline = pipeline.clone();
        let relay_token = run_token.clone();
        let join = self.tracker.spawn(async move {
            let run = run_pipeline.execute(&task, &options, run_id, Some(&state_tx));
            let relay = async {
                external.cancelled().await;
                relay_token.cancel();
                std::future::pending::<PipelineOutcome>().await
            };

            tokio::select! {
                outcome = run => outcome,
                outcome = relay => outcome,
            }
        });

        Ok(RunHandle {
            run_id,
            pipeline,
            state: state_rx,
            cancel: run_token,
            join,
        })
    }

    /// Refuse new runs and cancel the ones in flight
    pub async fn stop(&self) {
        self.set_status(Status::Stopped);
        self.tracker.close();
        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Agent runtime stopped");
    }

    /// Refuse new runs and wait for the ones in flight to finish
    pub async fn stop_when_idle(&self) {
        self.set_status(Status::Stopped);
        self.tracker.close();
        debug!(in_flight = self.tracker.len(), "Waiting for in-flight runs");
        self.tracker.wait().await;
        info!("Agent runtime stopped (idle)");
    }
}

/// Handle to one submitted run
pub struct RunHandle {
    run_id: Uuid,
    pipeline: Arc<SequentialPipeline>,
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
    join: JoinHandle<PipelineOutcome>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Latest published state
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver for following state transitions
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Request cancellation; takes effect at the latest between stages
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the outcome. If `timeout` elapses first, the run is cancelled
    /// and a run-scoped timeout is reported instead of any partial result.
    pub async fn get(mut self, timeout: Option<Duration>) -> PipelineOutcome {
        let Some(limit) = timeout else {
            return Self::flatten(self.join.await);
        };

        match tokio::time::timeout(limit, &mut self.join).await {
            Ok(joined) => Self::flatten(joined),
            Err(_) => self.caller_bound_elapsed(limit).await,
        }
    }

    async fn caller_bound_elapsed(self, limit: Duration) -> PipelineOutcome {
        // Already settled; the task is only returning its outcome
        if self.state().is_terminal() {
            return Self::flatten(self.join.await);
        }

        self.cancel.cancel();
        let index = stage_index_of(&self.state(), self.pipeline.stages().len());
        let stage = self
            .pipeline
            .stage_name(index)
            .unwrap_or_default()
            .to_string();
        info!(run_id = %self.run_id, stage = %stage, "Run exceeded caller timeout");
        Err(PipelineError::TimedOut {
            stage,
            index,
            scope: TimeoutScope::Run,
            limit,
        })
    }

    fn flatten(joined: Result<PipelineOutcome, tokio::task::JoinError>) -> PipelineOutcome {
        joined.unwrap_or_else(|e| {
            Err(PipelineError::Internal {
                message: format!("pipeline run task failed: {e}"),
            })
        })
    }
}

fn stage_index_of(state: &RunState, stage_count: usize) -> usize {
    match state {
        RunState::NotStarted => 0,
        RunState::Succeeded => stage_count.saturating_sub(1),
        RunState::Running { stage_index }
        | RunState::Failed { stage_index }
        | RunState::TimedOut { stage_index }
        | RunState::Cancelled { stage_index } => *stage_index,
    }
}
