//! Structured logging emitted by pipeline runs
//!
//! Captures JSON output from a scoped subscriber and checks that runs
//! carry their span context and structured fields.

mod test_helpers;

use agentchain::invoker::InvokeError;
use agentchain::observability::logging::{build_filter, parse_level, LogFormat};
use agentchain::pipeline::{PipelineStage, SequentialPipeline};
use agentchain::testing::MockInvoker;
use std::io;
use std::sync::{Arc, Mutex};
use test_helpers::{echo_stage, social_media_pipeline};
use tracing::Level;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// Run `pipeline` over `task` with JSON logs captured at `level`
fn capture_run(pipeline: &SequentialPipeline, task: &str, level: Level) -> String {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .with_writer(move || writer.clone())
        .finish();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    tracing::subscriber::with_default(subscriber, || {
        let _ = rt.block_on(pipeline.run(task));
    });

    buf.contents()
}

#[test]
fn test_successful_run_logs_within_pipeline_span() {
    let logs = capture_run(&social_media_pipeline(), "hello", Level::INFO);

    assert!(logs.contains("Pipeline run started"));
    assert!(logs.contains("Pipeline run succeeded"));
    assert!(logs.contains(r#""name":"pipeline_run""#));
    assert!(logs.contains(r#""pipeline":"social-media""#));
    assert!(logs.contains("run_id"));
}

#[test]
fn test_failed_run_logs_error_code_and_stage() {
    let pipeline = SequentialPipeline::new(
        "failing",
        vec![
            echo_stage("First", "1:"),
            PipelineStage::new(
                "Second",
                "p",
                Arc::new(MockInvoker::failing(InvokeError::RateLimited("429".into()))),
            ),
        ],
    )
    .unwrap();

    let logs = capture_run(&pipeline, "x", Level::WARN);

    assert!(logs.contains("Stage failed"));
    assert!(logs.contains(r#""stage":"Second""#));
    assert!(logs.contains(r#""code":"rate_limited""#));
    assert!(logs.contains(r#""code":"stage_invocation_failed""#));
    assert!(!logs.contains("Pipeline run started"), "info events filtered at WARN");
}

#[test]
fn test_debug_level_includes_stage_events() {
    let logs = capture_run(&social_media_pipeline(), "hello", Level::TRACE);
    assert!(logs.contains("Stage completed"));
    assert!(logs.contains(r#""stage":"Optimizer""#));
    assert!(logs.contains("Run state transition"));
}

#[test]
fn test_env_helpers() {
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert!(build_filter(Level::INFO).to_string().contains("reqwest=warn"));
}
