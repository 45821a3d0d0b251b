//! Embedding generation: the worker protocol, the worker threads and the
//! queue that feeds them.

pub mod processor;
pub mod protocol;
pub mod source;
pub mod worker;

use anyhow::Result;
use std::sync::Arc;

use crate::analysis::quality::QualityMetrics;
use crate::db::PhotoRecord;

pub use processor::{EmbeddingProcessor, ProcessorConfig, ProcessorEvent, ProcessorState};
pub use protocol::{WorkerRequest, WorkerResponse};
pub use source::{ImageSource, LocalFileSource};

/// What a worker produces for one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingOutput {
    pub embedding: Vec<f32>,
    pub quality_metrics: Option<QualityMetrics>,
}

/// An embedding model, owned by exactly one worker.
pub trait Embedder: Send {
    /// Load model weights. Called once before any `embed`.
    fn load(&mut self) -> Result<()>;

    fn embed(&mut self, photo: &PhotoRecord) -> Result<EmbeddingOutput>;
}

/// Builds a fresh embedder for the worker with the given id.
pub type EmbedderFactory = Arc<dyn Fn(usize) -> Box<dyn Embedder> + Send + Sync>;
