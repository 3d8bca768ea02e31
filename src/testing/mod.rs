//! Testing utilities and mock implementations
//!
//! Lets pipelines be exercised end to end without a hosted LLM.

pub mod mocks;

pub use mocks::*;
