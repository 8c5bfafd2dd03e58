//! driveocr conversion engine
//!
//! This module turns local image files into text through a `DocumentService`:
//! - Per-file conversion pipeline: upload as document, export text, clean up
//! - Batch orchestration with per-file failure isolation
//! - Combined text artifact with one section per converted file
//! - Retry with exponential backoff for remote cleanup

pub mod artifact;
pub mod batch;
pub mod pipeline;
pub mod retry;

// Re-export main types
pub use artifact::OutputArtifact;
pub use batch::{BatchEntry, BatchOrchestrator, BatchResult, EntryStatus, Submission};
pub use pipeline::{ConversionPipeline, PipelineConfig};
pub use retry::{is_transient, RetryConfig, RetryExecutor};
