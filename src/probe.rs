use crate::{config::Config, engine::PageSplitter, error::PipelineError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub file_bytes: u64,
    pub page_count: u32,
}

/// Discovers the page count and enforces the input limits.
pub fn probe_document(
    cfg: &Config,
    splitter: &dyn PageSplitter,
    document: &[u8],
) -> Result<ProbeResult> {
    let file_bytes = document.len() as u64;
    if file_bytes > cfg.limits.max_input_file_bytes {
        anyhow::bail!("input exceeds max_input_file_bytes: {}", file_bytes);
    }

    let page_count = splitter
        .page_count(document)
        .with_context(|| "page count discovery failed")?;

    if page_count == 0 {
        return Err(PipelineError::EmptyDocument.into());
    }
    if page_count > cfg.limits.max_input_pages {
        return Err(PipelineError::PageLimit {
            pages: page_count,
            max: cfg.limits.max_input_pages,
        }
        .into());
    }

    Ok(ProbeResult {
        file_bytes,
        page_count,
    })
}
