//! Concrete `LlmProvider` backends
//!
//! `openai` covers both api.openai.com and Azure OpenAI deployments.

pub mod anthropic;
pub mod openai;

pub use anthropic::*;
pub use openai::*;
