//! Test helpers and utilities for integration tests

use agentchain::pipeline::{PipelineStage, SequentialPipeline};
use agentchain::testing::MockInvoker;
use std::sync::Arc;

/// Stage backed by an invoker that prefixes its input
#[allow(dead_code)]
pub fn echo_stage(name: &str, prefix: &str) -> PipelineStage {
    PipelineStage::new(
        name,
        format!("You are the {name}."),
        Arc::new(MockInvoker::echo_with_prefix(prefix)),
    )
}

/// Analyzer -> Optimizer -> Reviewer, each prefixing its initial
#[allow(dead_code)]
pub fn social_media_pipeline() -> SequentialPipeline {
    SequentialPipeline::new(
        "social-media",
        vec![
            echo_stage("Analyzer", "A:"),
            echo_stage("Optimizer", "O:"),
            echo_stage("Reviewer", "R:"),
        ],
    )
    .expect("three stages are a valid pipeline")
}

/// Minimal valid configuration with the given `[[stages]]` appended
#[allow(dead_code)]
pub fn config_toml(provider: &str, stages: &[(&str, &str)]) -> String {
    let mut toml = format!(
        r#"
[pipeline]
name = "test-pipeline"
timeout_secs = 60

[llm]
provider = "{provider}"
model = "gpt-4o-mini"
api_key_env = "AGENTCHAIN_TEST_KEY"
endpoint = "https://example.openai.azure.com/"
api_version = "2024-06-01"
"#
    );

    for (name, instructions) in stages {
        toml.push_str(&format!(
            "\n[[stages]]\nname = \"{name}\"\ninstructions = \"{instructions}\"\n"
        ));
    }
    toml
}
