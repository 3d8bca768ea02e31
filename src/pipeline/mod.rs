//! Sequential multi-agent pipeline
//!
//! A [`SequentialPipeline`] holds an ordered list of [`PipelineStage`]s.
//! Running it feeds the task to the first stage, each stage's reply to the
//! next, and returns the last reply. Observers see every intermediate
//! [`StageResult`] before the following stage starts.

pub mod observer;
pub mod runner;
pub mod stage;
pub mod state;

pub use observer::{ConsoleObserver, LoggingObserver, StageObserver};
pub use runner::{PipelineOutcome, PipelineSuccess, RunOptions, SequentialPipeline};
pub use stage::{PipelineStage, StageResult};
pub use state::RunState;
