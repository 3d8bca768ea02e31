//! Sequential pipeline runner
//!
//! Executes stages strictly one after another, threading each stage's output
//! into the next stage's input. The first failure ends the run; no later
//! stage is invoked and no partial chain is returned as a result.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, TimeoutScope};
use crate::invoker::{AgentInvoker, InvokeError};
use crate::observability::metrics::metrics;
use crate::pipeline::observer::StageObserver;
use crate::pipeline::stage::{PipelineStage, StageResult};
use crate::pipeline::state::RunState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

/// Successful end of a run
#[derive(Debug, Clone)]
pub struct PipelineSuccess {
    pub run_id: Uuid,
    /// Output of the last stage
    pub output: String,
    /// One entry per stage, in declaration order
    pub results: Vec<StageResult>,
}

/// Terminal result of one run, produced exactly once
pub type PipelineOutcome = Result<PipelineSuccess, PipelineError>;

/// Caller-controlled bounds for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    timeout: Option<Duration>,
    stage_timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the run bounds from `[pipeline]`
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            timeout: config.run_timeout(),
            stage_timeout: config.stage_timeout(),
            ..Default::default()
        }
    }

    /// Bound on the whole run
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound on each stage invocation
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Ordered, immutable chain of stages plus the observers to notify
pub struct SequentialPipeline {
    name: String,
    stages: Vec<PipelineStage>,
    observers: Vec<Arc<dyn StageObserver>>,
}

enum StageFailure {
    Invoke(InvokeError),
    Elapsed { scope: TimeoutScope, limit: Duration },
    Cancelled,
}

struct StateReporter<'a> {
    tx: Option<&'a watch::Sender<RunState>>,
    current: RunState,
}

impl<'a> StateReporter<'a> {
    fn new(tx: Option<&'a watch::Sender<RunState>>) -> Self {
        Self {
            tx,
            current: RunState::NotStarted,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.current.can_transition_to(&next),
            "illegal run state transition {} -> {}",
            self.current,
            next
        );
        trace!(from = %self.current, to = %next, "Run state transition");
        if let Some(tx) = self.tx {
            tx.send_replace(next);
        }
        self.current = next;
    }
}

impl SequentialPipeline {
    /// Build a pipeline; rejects an empty stage list and blank stage names
    pub fn new(name: impl Into<String>, stages: Vec<PipelineStage>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        if let Some(index) = stages.iter().position(|s| s.name().trim().is_empty()) {
            return Err(PipelineError::InvalidStage {
                index,
                reason: "stage name must not be blank".to_string(),
            });
        }

        Ok(Self {
            name: name.into(),
            stages,
            observers: Vec::new(),
        })
    }

    /// Build the configured stages, all backed by one invoker
    pub fn from_config(
        config: &PipelineConfig,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Result<Self, PipelineError> {
        let stages = config
            .stages
            .iter()
            .map(|s| PipelineStage::new(&s.name, &s.instructions, invoker.clone()))
            .collect();
        Self::new(&config.pipeline.name, stages)
    }

    /// Register an observer; observers are notified in registration order
    pub fn with_observer(self, observer: impl StageObserver + 'static) -> Self {
        self.with_shared_observer(Arc::new(observer))
    }

    pub fn with_shared_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Name of the stage at `index`, if it exists
    pub fn stage_name(&self, index: usize) -> Option<&str> {
        self.stages.get(index).map(PipelineStage::name)
    }

    /// Run with no bounds and no cancellation
    pub async fn run(&self, task: &str) -> PipelineOutcome {
        self.run_with(task, &RunOptions::default()).await
    }

    pub async fn run_with(&self, task: &str, options: &RunOptions) -> PipelineOutcome {
        self.execute(task, options, Uuid::new_v4(), None).await
    }

    /// Full run, optionally publishing every state transition
    pub(crate) async fn execute(
        &self,
        task: &str,
        options: &RunOptions,
        run_id: Uuid,
        state_tx: Option<&watch::Sender<RunState>>,
    ) -> PipelineOutcome {
        let span = crate::pipeline_span!(pipeline = %self.name, run_id = %run_id);

        async move {
            let mut state = StateReporter::new(state_tx);

            if task.trim().is_empty() {
                let outcome = Err(PipelineError::EmptyTask);
                state.advance(RunState::from_outcome(&outcome));
                return outcome;
            }

            let collector = metrics();
            collector.run_started();
            let started = Instant::now();
            info!(stages = self.stages.len(), "Pipeline run started");

            let outcome = self
                .execute_stages(task, options, run_id, started, &mut state)
                .await;

            let terminal = RunState::from_outcome(&outcome);
            state.advance(terminal);
            collector.run_finished(&terminal, started.elapsed());

            match &outcome {
                Ok(success) => info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    output_chars = success.output.chars().count(),
                    "Pipeline run succeeded"
                ),
                Err(e) => warn!(
                    code = e.code(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Pipeline run ended without a result"
                ),
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_stages(
        &self,
        task: &str,
        options: &RunOptions,
        run_id: Uuid,
        started: Instant,
        state: &mut StateReporter<'_>,
    ) -> PipelineOutcome {
        let deadline = options.timeout.map(|t| started + t);
        let mut current = task.to_string();
        let mut results = Vec::with_capacity(self.stages.len());

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.name().to_string();

            if options.cancellation.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    stage: stage_name,
                    index,
                });
            }

            let budget = self.stage_budget(options, deadline);
            if let Some((remaining, TimeoutScope::Run, limit)) = budget {
                if remaining.is_zero() {
                    return Err(PipelineError::TimedOut {
                        stage: stage_name,
                        index,
                        scope: TimeoutScope::Run,
                        limit,
                    });
                }
            }

            state.advance(RunState::Running { stage_index: index });
            debug!(stage = %stage_name, stage_index = index, "Stage started");
            for observer in &self.observers {
                observer.on_stage_started(index, &stage_name);
            }

            let stage_started = Instant::now();
            let attempt = tokio::select! {
                biased;
                _ = options.cancellation.cancelled() => Err(StageFailure::Cancelled),
                r = Self::invoke_within(stage, &current, budget) => r,
            };
            let elapsed = stage_started.elapsed();
            metrics().stage_completed(&stage_name, elapsed, attempt.is_ok());

            let output = match attempt {
                Ok(output) => output,
                Err(StageFailure::Invoke(source)) => {
                    warn!(stage = %stage_name, stage_index = index, code = source.code(), error = %source, "Stage failed");
                    return Err(PipelineError::StageFailed {
                        stage: stage_name,
                        index,
                        source,
                    });
                }
                Err(StageFailure::Elapsed { scope, limit }) => {
                    warn!(stage = %stage_name, stage_index = index, %scope, "Stage exceeded its time budget");
                    return Err(PipelineError::TimedOut {
                        stage: stage_name,
                        index,
                        scope,
                        limit,
                    });
                }
                Err(StageFailure::Cancelled) => {
                    debug!(stage = %stage_name, stage_index = index, "Stage cancelled in flight");
                    return Err(PipelineError::Cancelled {
                        stage: stage_name,
                        index,
                    });
                }
            };

            debug!(
                stage = %stage_name,
                stage_index = index,
                elapsed_ms = elapsed.as_millis() as u64,
                "Stage completed"
            );

            let result = StageResult {
                stage_name,
                stage_index: index,
                output,
                duration: elapsed,
                completed_at: Utc::now(),
            };

            for observer in &self.observers {
                observer.on_stage_result(&result);
            }

            current.clone_from(&result.output);
            results.push(result);
        }

        // Observers of the last stage still count against the run bound
        if let (Some(deadline), Some(limit)) = (deadline, options.timeout) {
            if Instant::now() >= deadline {
                let index = self.stages.len() - 1;
                let stage = self.stages[index].name().to_string();
                warn!(stage = %stage, stage_index = index, "Run bound elapsed before the outcome was produced");
                return Err(PipelineError::TimedOut {
                    stage,
                    index,
                    scope: TimeoutScope::Run,
                    limit,
                });
            }
        }

        Ok(PipelineSuccess {
            run_id,
            output: current,
            results,
        })
    }

    /// Time available to the next stage: `(budget, scope, limit to report)`.
    /// The tighter of the per-stage bound and what is left of the run wins.
    fn stage_budget(
        &self,
        options: &RunOptions,
        deadline: Option<Instant>,
    ) -> Option<(Duration, TimeoutScope, Duration)> {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));

        match (options.stage_timeout, remaining, options.timeout) {
            (Some(stage), Some(left), Some(run)) if left < stage => {
                Some((left, TimeoutScope::Run, run))
            }
            (Some(stage), _, _) => Some((stage, TimeoutScope::Stage, stage)),
            (None, Some(left), Some(run)) => Some((left, TimeoutScope::Run, run)),
            _ => None,
        }
    }

    async fn invoke_within(
        stage: &PipelineStage,
        input: &str,
        budget: Option<(Duration, TimeoutScope, Duration)>,
    ) -> Result<String, StageFailure> {
        match budget {
            Some((within, scope, limit)) => {
                match tokio::time::timeout(within, stage.invoke(input)).await {
                    Ok(result) => result.map_err(StageFailure::Invoke),
                    Err(_) => Err(StageFailure::Elapsed { scope, limit }),
                }
            }
            None => stage.invoke(input).await.map_err(StageFailure::Invoke),
        }
    }
}

impl std::fmt::Debug for SequentialPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialPipeline")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("observers", &self.observers.len())
            .finish()
    }
}
