pub mod transcribe;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

pub use transcribe::TranscribeProcessor;

/// What a processor hands back: a structured result document and a
/// human-readable rendering of it.
#[derive(Debug, Clone)]
pub struct ProcessorOutput {
    pub structured: serde_json::Value,
    pub rendered: String,
}

/// The black-box transform invoked by the worker. Given the cached
/// input path it either produces both artifact forms or fails with a
/// message that ends up on the task record.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, input: &Path) -> Result<ProcessorOutput>;
}
