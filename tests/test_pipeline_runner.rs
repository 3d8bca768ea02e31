//! Behavioral tests for the sequential pipeline runner
//!
//! Covers output threading, fail-fast semantics, observer ordering,
//! timeouts, cancellation and concurrent runs, all against mock invokers.

mod test_helpers;

use agentchain::error::{PipelineError, TimeoutScope};
use agentchain::invoker::InvokeError;
use agentchain::pipeline::{PipelineStage, RunOptions, SequentialPipeline, StageResult};
use agentchain::testing::{MockInvoker, ObservedEvent, RecordingObserver};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{echo_stage, social_media_pipeline};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_three_stage_scenario_threads_outputs() {
    let observer = Arc::new(RecordingObserver::new());
    let pipeline = social_media_pipeline().with_shared_observer(observer.clone());

    let success = pipeline.run("hello").await.unwrap();

    assert_eq!(success.output, "R:O:A:hello");
    assert_eq!(
        observer.completed(),
        vec![
            ("Analyzer".to_string(), "A:hello".to_string()),
            ("Optimizer".to_string(), "O:A:hello".to_string()),
            ("Reviewer".to_string(), "R:O:A:hello".to_string()),
        ]
    );
    assert_eq!(success.results, observer.results());
}

#[tokio::test]
async fn test_second_stage_failure_stops_the_run() {
    let observer = Arc::new(RecordingObserver::new());
    let pipeline = SequentialPipeline::new(
        "two-stage",
        vec![
            echo_stage("First", "1:"),
            PipelineStage::new(
                "Second",
                "always fails",
                Arc::new(MockInvoker::failing(InvokeError::Other(
                    "model unavailable".into(),
                ))),
            ),
        ],
    )
    .unwrap()
    .with_shared_observer(observer.clone());

    let err = pipeline.run("x").await.unwrap_err();

    assert_eq!(err.failed_stage(), Some((1, "Second")));
    assert_eq!(err.code(), "stage_invocation_failed");
    assert_eq!(observer.completed(), vec![("First".to_string(), "1:x".to_string())]);

    let report = err.to_report();
    assert_eq!(report.stage.as_deref(), Some("Second"));
    assert_eq!(report.stage_index, Some(1));
    assert_eq!(report.cause, Some("invoker_error"));
}

#[test]
fn test_empty_stage_list_is_rejected_at_construction() {
    let result = SequentialPipeline::new("nothing", Vec::new());
    assert!(matches!(result, Err(PipelineError::EmptyPipeline)));
}

#[tokio::test]
async fn test_stages_after_failure_are_never_invoked() {
    let first = Arc::new(MockInvoker::echo_with_prefix("a"));
    let failing = Arc::new(MockInvoker::failing(InvokeError::Transport("reset".into())));
    let third = Arc::new(MockInvoker::echo_with_prefix("c"));
    let fourth = Arc::new(MockInvoker::echo_with_prefix("d"));

    let pipeline = SequentialPipeline::new(
        "fail-fast",
        vec![
            PipelineStage::new("One", "p", first.clone()),
            PipelineStage::new("Two", "p", failing.clone()),
            PipelineStage::new("Three", "p", third.clone()),
            PipelineStage::new("Four", "p", fourth.clone()),
        ],
    )
    .unwrap();

    let err = pipeline.run("task").await.unwrap_err();

    assert!(matches!(err, PipelineError::StageFailed { index: 1, .. }));
    assert_eq!(first.call_count(), 1);
    assert_eq!(failing.call_count(), 1);
    assert_eq!(third.call_count(), 0);
    assert_eq!(fourth.call_count(), 0);
}

#[tokio::test]
async fn test_each_stage_receives_its_own_instructions() {
    let shared = Arc::new(MockInvoker::echo_with_prefix(">"));
    let pipeline = SequentialPipeline::new(
        "personas",
        vec![
            PipelineStage::new("Analyzer", "analyze", shared.clone()),
            PipelineStage::new("Reviewer", "review", shared.clone()),
        ],
    )
    .unwrap();

    pipeline.run("post").await.unwrap();

    let calls = shared.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].instructions.as_str(), calls[0].input.as_str()), ("analyze", "post"));
    assert_eq!((calls[1].instructions.as_str(), calls[1].input.as_str()), ("review", ">post"));
}

#[tokio::test]
async fn test_observer_notified_before_next_stage_starts() {
    let observer = Arc::new(RecordingObserver::new());
    let pipeline = social_media_pipeline().with_shared_observer(observer.clone());

    pipeline.run("hello").await.unwrap();

    let events = observer.events();
    assert_eq!(events.len(), 6);
    for (i, pair) in events.chunks(2).enumerate() {
        assert!(matches!(&pair[0], ObservedEvent::Started { index, .. } if *index == i));
        assert!(matches!(&pair[1], ObservedEvent::Completed { index, .. } if *index == i));
    }
}

#[tokio::test]
async fn test_observers_run_in_registration_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (a, b) = (order.clone(), order.clone());

    let pipeline = SequentialPipeline::new("p", vec![echo_stage("Only", "")])
        .unwrap()
        .with_observer(move |_: &StageResult| a.lock().unwrap().push("first"))
        .with_observer(move |_: &StageResult| b.lock().unwrap().push("second"));

    pipeline.run("t").await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_run_timeout_reports_stage_in_flight() {
    let slow = Arc::new(MockInvoker::echo_with_prefix("S:").with_delay(Duration::from_secs(10)));
    let pipeline = SequentialPipeline::new(
        "slow",
        vec![echo_stage("Fast", "F:"), PipelineStage::new("Slow", "p", slow)],
    )
    .unwrap();

    let options = RunOptions::new().with_timeout(Duration::from_millis(100));
    let err = pipeline.run_with("t", &options).await.unwrap_err();

    match err {
        PipelineError::TimedOut {
            stage,
            index,
            scope,
            limit,
        } => {
            assert_eq!(stage, "Slow");
            assert_eq!(index, 1);
            assert_eq!(scope, TimeoutScope::Run);
            assert_eq!(limit, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_final_observer_exceeds_run_timeout() {
    let pipeline = SequentialPipeline::new("observed", vec![echo_stage("A", "A:")])
        .unwrap()
        .with_observer(|_: &StageResult| std::thread::sleep(Duration::from_millis(300)));

    let options = RunOptions::new().with_timeout(Duration::from_millis(50));
    let err = pipeline.run_with("t", &options).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::TimedOut {
            scope: TimeoutScope::Run,
            index: 0,
            ..
        }
    ));
    assert_eq!(err.failed_stage(), Some((0, "A")));
}

#[tokio::test]
async fn test_stage_timeout_has_stage_scope() {
    let slow = Arc::new(MockInvoker::echo_with_prefix("S:").with_delay(Duration::from_secs(10)));
    let pipeline =
        SequentialPipeline::new("slow", vec![PipelineStage::new("Slow", "p", slow)]).unwrap();

    let options = RunOptions::new()
        .with_timeout(Duration::from_secs(30))
        .with_stage_timeout(Duration::from_millis(50));
    let err = pipeline.run_with("t", &options).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::TimedOut {
            scope: TimeoutScope::Stage,
            index: 0,
            ..
        }
    ));
    assert_eq!(err.code(), "timeout");
}

#[tokio::test]
async fn test_cancel_before_run_invokes_nothing() {
    let invoker = Arc::new(MockInvoker::echo_with_prefix("A:"));
    let pipeline =
        SequentialPipeline::new("p", vec![PipelineStage::new("A", "p", invoker.clone())]).unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = pipeline
        .run_with("t", &RunOptions::new().with_cancellation(token))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { index: 0, .. }));
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_between_stages_stops_at_next_boundary() {
    let second = Arc::new(MockInvoker::echo_with_prefix("2:"));
    let token = CancellationToken::new();
    let trigger = token.clone();

    let pipeline = SequentialPipeline::new(
        "p",
        vec![
            echo_stage("First", "1:"),
            PipelineStage::new("Second", "p", second.clone()),
        ],
    )
    .unwrap()
    .with_observer(move |_: &StageResult| trigger.cancel());

    let err = pipeline
        .run_with("t", &RunOptions::new().with_cancellation(token))
        .await
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some((1, "Second")));
    assert_eq!(err.code(), "cancelled");
    assert_eq!(second.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_interrupts_stage_in_flight() {
    let slow = Arc::new(MockInvoker::echo_with_prefix("S:").with_delay(Duration::from_secs(30)));
    let pipeline =
        SequentialPipeline::new("p", vec![PipelineStage::new("Slow", "p", slow)]).unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run_with("t", &RunOptions::new().with_cancellation(token)),
    )
    .await
    .expect("cancellation should end the run promptly");

    assert!(matches!(outcome, Err(PipelineError::Cancelled { index: 0, .. })));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let pipeline = Arc::new(social_media_pipeline());

    let runs = (0..8).map(|i| {
        let pipeline = pipeline.clone();
        async move { pipeline.run(&format!("task-{i}")).await }
    });
    let outcomes = futures::future::join_all(runs).await;

    for (i, outcome) in outcomes.into_iter().enumerate() {
        let success = outcome.unwrap();
        assert_eq!(success.output, format!("R:O:A:task-{i}"));
        assert_eq!(success.results.len(), 3);
    }
}

#[tokio::test]
async fn test_runs_get_distinct_ids() {
    let pipeline = social_media_pipeline();
    let first = pipeline.run("a").await.unwrap();
    let second = pipeline.run("a").await.unwrap();
    assert_ne!(first.run_id, second.run_id);
}

fn run_blocking(pipeline: &SequentialPipeline, task: &str) -> Vec<(String, String)> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(pipeline.run(task))
        .unwrap()
        .results
        .into_iter()
        .map(|r| (r.stage_name, r.output))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_output_is_composition_of_stages(
        prefixes in prop::collection::vec("[a-z]{1,3}:", 1..6),
        task in "[a-zA-Z0-9 ]{1,20}",
    ) {
        prop_assume!(!task.trim().is_empty());

        let stages = prefixes
            .iter()
            .enumerate()
            .map(|(i, p)| echo_stage(&format!("stage-{i}"), p))
            .collect();
        let pipeline = SequentialPipeline::new("prop", stages).unwrap();

        let results = run_blocking(&pipeline, &task);
        let expected: String = prefixes.iter().rev().cloned().collect::<String>() + &task;

        prop_assert_eq!(results.len(), prefixes.len());
        prop_assert_eq!(&results.last().unwrap().1, &expected);

        // Deterministic stages give identical results on a second run
        prop_assert_eq!(run_blocking(&pipeline, &task), results);
    }
}
