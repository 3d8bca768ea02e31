//! Offline walk-through of a three-agent pipeline
//!
//! Uses scripted invokers in place of a hosted model so it runs anywhere:
//!
//! ```bash
//! cargo run --example stub_pipeline
//! ```

use agentchain::invoker::InvokeError;
use agentchain::observability::{init_default_logging, metrics};
use agentchain::pipeline::{ConsoleObserver, PipelineStage, RunOptions, SequentialPipeline};
use agentchain::runtime::AgentRuntime;
use agentchain::testing::MockInvoker;
use std::sync::Arc;
use std::time::Duration;

const POST: &str = "Hi Folks, I am launching a new Beginners to Pro Course on Udemy on \
Model Context Protocol MCP across the AI Ecosystem covering AI Frameworks and Models";

fn agent(label: &'static str) -> Arc<MockInvoker> {
    Arc::new(
        MockInvoker::from_fn(move |_, _, input| {
            Ok(format!("[{label}] {}", input.lines().last().unwrap_or_default()))
        })
        .with_delay(Duration::from_millis(150)),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_default_logging();

    let pipeline = SequentialPipeline::new(
        "social-media-demo",
        vec![
            PipelineStage::new("AnalyzerAgent", "You are a social media analyst.", agent("analysis")),
            PipelineStage::new("OptimizerAgent", "You are a content optimizer.", agent("optimized")),
            PipelineStage::new("ReviewerAgent", "You are a content reviewer.", agent("reviewed")),
        ],
    )?
    .with_observer(ConsoleObserver::stdout());
    let pipeline = Arc::new(pipeline);

    let runtime = AgentRuntime::new();
    runtime.start()?;

    // A successful run
    let handle = runtime.invoke(pipeline.clone(), POST, RunOptions::new())?;
    let success = handle.get(Some(Duration::from_secs(60))).await?;
    println!("FINAL RESULT\n{}\n{}", "=".repeat(55), success.output);

    // A run that outlives its caller's patience
    let handle = runtime.invoke(pipeline.clone(), POST, RunOptions::new())?;
    if let Err(e) = handle.get(Some(Duration::from_millis(200))).await {
        println!("\nSecond run: {e}");
    }

    // A failing agent stops the chain
    let failing = SequentialPipeline::new(
        "failing-demo",
        vec![
            PipelineStage::new("AnalyzerAgent", "analyze", agent("analysis")),
            PipelineStage::new(
                "OptimizerAgent",
                "optimize",
                Arc::new(MockInvoker::failing(InvokeError::RateLimited(
                    "rate limit exceeded".to_string(),
                ))),
            ),
        ],
    )?;
    if let Err(e) = failing.run(POST).await {
        println!("Third run: {}", serde_json::to_string(&e.to_report())?);
    }

    runtime.stop_when_idle().await;
    println!("\n{}", serde_json::to_string_pretty(&metrics().snapshot())?);
    Ok(())
}
