use crate::{config::Config, engine::PageSplitter, error::PipelineError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub page_count: u32,
    pub pages_per_chunk: u32,
    pub chunks: Vec<PageRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start_page: u32, // 1-based inclusive
    pub end_page: u32,   // 1-based inclusive
}

impl PageRange {
    pub fn page_count(&self) -> u32 {
        self.end_page - self.start_page + 1
    }

    /// Maps a 1-based page number local to this range onto the document's numbering.
    pub fn to_global(&self, local_page: u32) -> u32 {
        self.start_page.saturating_add(local_page.saturating_sub(1))
    }
}

/// Immutable page-range slice of the source document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub pages: PageRange,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn label(&self) -> String {
        format!(
            "chunk {} (pages {}-{})",
            self.index, self.pages.start_page, self.pages.end_page
        )
    }
}

impl ChunkPlan {
    /// Plans `page_count` pages with the configured chunk size, refusing
    /// documents above `limits.max_input_pages`.
    pub fn from_page_count(cfg: &Config, page_count: u32) -> Result<Self, PipelineError> {
        if page_count > cfg.limits.max_input_pages {
            return Err(PipelineError::PageLimit {
                pages: page_count,
                max: cfg.limits.max_input_pages,
            });
        }
        Self::with_chunk_size(page_count, cfg.chunking.pages_per_chunk)
    }

    pub fn with_chunk_size(page_count: u32, pages_per_chunk: u32) -> Result<Self, PipelineError> {
        if page_count == 0 {
            return Err(PipelineError::EmptyDocument);
        }
        let size = pages_per_chunk.max(1);
        let count = page_count.div_ceil(size);

        // Chunk i covers [i*S + 1, min((i+1)*S, P)]; u64 keeps the bounds exact near u32::MAX.
        let chunks = (0..u64::from(count))
            .map(|i| {
                let start = i * u64::from(size) + 1;
                let end = ((i + 1) * u64::from(size)).min(u64::from(page_count));
                PageRange {
                    start_page: start as u32,
                    end_page: end as u32,
                }
            })
            .collect();

        Ok(ChunkPlan {
            page_count,
            pages_per_chunk: size,
            chunks,
        })
    }

    /// Cuts the document into chunk payloads. A single-chunk plan reuses the whole document.
    pub fn materialize(&self, splitter: &dyn PageSplitter, document: &[u8]) -> Result<Vec<Chunk>> {
        if self.chunks.len() == 1 {
            return Ok(vec![Chunk {
                index: 0,
                pages: self.chunks[0],
                bytes: document.to_vec(),
            }]);
        }

        self.chunks
            .iter()
            .enumerate()
            .map(|(index, range)| {
                let bytes = splitter.slice(document, *range).with_context(|| {
                    format!(
                        "splitting chunk {} (pages {}-{})",
                        index, range.start_page, range.end_page
                    )
                })?;
                Ok(Chunk {
                    index,
                    pages: *range,
                    bytes,
                })
            })
            .collect()
    }
}
