pub mod command;
pub mod process;
pub mod python;
pub mod types;

use anyhow::Result;

use crate::{chunk_plan::PageRange, error::ExtractionFailure, merge::UnifiedResult};

pub use types::{ExtractOut, NormalizeIn, NormalizeOut, PartialResult, ProbeOut};

/// External extraction capability: one chunk in, one structured partial result out.
///
/// Implementations must not retry; the chunk processor owns retry policy.
pub trait Extractor: Send + Sync {
    fn extract(&self, chunk_bytes: &[u8], chunk_label: &str)
    -> Result<PartialResult, ExtractionFailure>;
}

/// Mechanical page-count discovery and page-range slicing.
pub trait PageSplitter: Send + Sync {
    fn page_count(&self, document: &[u8]) -> Result<u32>;
    fn slice(&self, document: &[u8], range: PageRange) -> Result<Vec<u8>>;
}

/// Second-stage reshaping of a finished unified result.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, unified: &UnifiedResult, source_name: &str) -> Result<serde_json::Value>;
}
