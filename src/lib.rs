//! agentchain - sequential multi-agent pipelines over hosted LLMs
//!
//! A pipeline is an ordered list of stages. Each stage pairs a name with
//! persona instructions and an [`AgentInvoker`]. Running the pipeline feeds
//! the task to the first stage, each reply to the next stage, and returns
//! the last reply. Observers are told about every intermediate result.
//! The first failure ends the run, and runs can be bounded by timeouts or
//! cancelled.
//!
//! # Quick Start
//!
//! ```rust
//! use agentchain::pipeline::{PipelineStage, SequentialPipeline, StageResult};
//! use agentchain::testing::MockInvoker;
//! use std::sync::Arc;
//!
//! # tokio_test_block_on(async {
//! let pipeline = SequentialPipeline::new(
//!     "demo",
//!     vec![
//!         PipelineStage::new("Analyzer", "You analyze.", Arc::new(MockInvoker::echo_with_prefix("A:"))),
//!         PipelineStage::new("Optimizer", "You optimize.", Arc::new(MockInvoker::echo_with_prefix("O:"))),
//!         PipelineStage::new("Reviewer", "You review.", Arc::new(MockInvoker::echo_with_prefix("R:"))),
//!     ],
//! )
//! .unwrap()
//! .with_observer(|r: &StageResult| println!("{}: {}", r.stage_name, r.output));
//!
//! let success = pipeline.run("hello").await.unwrap();
//! assert_eq!(success.output, "R:O:A:hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod config;
pub mod error;
pub mod invoker;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod runtime;
pub mod testing;

pub use config::{PipelineConfig, ProviderKind};
pub use error::{AppError, AppResult, ErrorReport, PipelineError, TimeoutScope};
pub use invoker::{AgentInvoker, InvokeError, LlmInvoker};
pub use pipeline::{
    PipelineOutcome, PipelineStage, PipelineSuccess, RunOptions, RunState, SequentialPipeline,
    StageObserver, StageResult,
};
pub use runtime::{AgentRuntime, RunHandle, RuntimeError};
