//! Failure taxonomy for the chunked extraction pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::chunk_plan::PageRange;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("document has zero pages")]
    EmptyDocument,
    #[error("input exceeds max_input_pages: {pages} > {max}")]
    PageLimit { pages: u32, max: u32 },
    #[error("extraction failed: {reason}")]
    Extraction { reason: String },
    #[error("job timeout exceeded: {}s budget", budget.as_secs())]
    JobTimeout { budget: Duration },
    #[error(transparent)]
    PermanentChunkFailure(#[from] ChunkFailure),
    #[error(
        "merge failed for chunk {chunk_index} (pages {}-{}): {reason}",
        pages.start_page,
        pages.end_page
    )]
    MergeFailure {
        chunk_index: usize,
        pages: PageRange,
        reason: String,
    },
    #[error("normalization failed: {0}")]
    Normalization(String),
}

/// Single failed call to the extraction capability. Retried by the chunk processor.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ExtractionFailure {
    pub reason: String,
}

impl ExtractionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<ExtractionFailure> for PipelineError {
    fn from(f: ExtractionFailure) -> Self {
        PipelineError::Extraction { reason: f.reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Timeout,
    RetriesExhausted,
}

/// Terminal verdict for one chunk. Its `Display` is the message stored on the job.
#[derive(Debug, Clone, Error)]
#[error(
    "chunk {chunk_index} (pages {}-{}) failed: {last_error}",
    pages.start_page,
    pages.end_page
)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub pages: PageRange,
    pub kind: FailureKind,
    pub last_error: String,
}

#[derive(Debug, Clone, Error)]
pub enum JobStateError {
    #[error("job {job_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("job {job_id}: totals already set")]
    TotalsAlreadySet { job_id: String },
    #[error("job {job_id}: progress {processed}/{total} {unit} out of range")]
    ProgressOutOfRange {
        job_id: String,
        unit: &'static str,
        processed: u32,
        total: u32,
    },
}
