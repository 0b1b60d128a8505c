use crate::{
    chunk_plan::{Chunk, PageRange},
    config::Config,
    deadline::JobDeadline,
    engine::{Extractor, PartialResult},
    error::{ChunkFailure, ExtractionFailure, FailureKind, PipelineError},
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome for one chunk: remapped partial result or a permanent failure.
pub type ChunkResult = Result<PartialResult, ChunkFailure>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: vec![Duration::from_secs(2), Duration::from_secs(4)],
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_retries: cfg.retry.max_retries,
            backoff: cfg
                .retry
                .backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// Delay before the given retry (1-based). The last configured delay repeats.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.backoff.is_empty() || retry == 0 {
            return Duration::ZERO;
        }
        let idx = (retry as usize - 1).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

/// Rewrites chunk-local page numbers into document page numbers.
#[derive(Debug, Clone)]
pub struct PageRemapper {
    pub debug_key: String,
    pub page_field: String,
    pub buckets: Vec<String>,
}

impl PageRemapper {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            debug_key: cfg.merge.debug_key.clone(),
            page_field: cfg.merge.page_field.clone(),
            buckets: cfg.merge.buckets.clone(),
        }
    }

    /// Fails when a page number does not fall inside the chunk's own span;
    /// the result is untouched in that case.
    pub fn remap(&self, result: &mut PartialResult, pages: PageRange) -> Result<(), ExtractionFailure> {
        let keys = std::iter::once(&self.debug_key).chain(self.buckets.iter());
        for key in keys.clone() {
            let Some(items) = result.get(key.as_str()).and_then(Value::as_array) else {
                continue;
            };
            let locals = items
                .iter()
                .filter_map(|item| item.get(self.page_field.as_str()).and_then(Value::as_u64));
            for local in locals {
                if local == 0 || local > u64::from(pages.page_count()) {
                    return Err(ExtractionFailure::new(format!(
                        "malformed extractor payload: page {} in `{}` outside chunk span 1-{}",
                        local,
                        key,
                        pages.page_count()
                    )));
                }
            }
        }

        for key in keys {
            let Some(Value::Array(items)) = result.get_mut(key.as_str()) else {
                continue;
            };
            for item in items.iter_mut() {
                let Some(page) = item
                    .as_object_mut()
                    .and_then(|o| o.get_mut(self.page_field.as_str()))
                else {
                    continue;
                };
                // Range-checked above, so the narrowing cannot fail.
                let Some(local) = page.as_u64().and_then(|p| u32::try_from(p).ok()) else {
                    continue;
                };
                *page = Value::from(pages.to_global(local));
            }
        }
        Ok(())
    }
}

/// Wraps an extractor with bounded retry, backoff, and the job deadline.
pub struct ChunkProcessor<'a> {
    extractor: &'a dyn Extractor,
    policy: RetryPolicy,
    remapper: PageRemapper,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(extractor: &'a dyn Extractor, policy: RetryPolicy, remapper: PageRemapper) -> Self {
        Self {
            extractor,
            policy,
            remapper,
        }
    }

    pub fn process(&self, chunk: &Chunk, deadline: &JobDeadline) -> ChunkResult {
        let label = chunk.label();
        let attempts = self.policy.max_retries + 1;
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                if let Err(e) = deadline.check() {
                    return Err(self.failure(chunk, FailureKind::Timeout, e.to_string()));
                }
                let delay = self.policy.delay_for(attempt);
                // The next attempt could never start in time.
                if delay >= deadline.remaining() {
                    let e = PipelineError::JobTimeout {
                        budget: deadline.budget(),
                    };
                    return Err(self.failure(chunk, FailureKind::Timeout, e.to_string()));
                }
                info!(
                    "{} retry {}/{} in {:?}",
                    label, attempt, self.policy.max_retries, delay
                );
                std::thread::sleep(delay);
            }

            if let Err(e) = deadline.check() {
                return Err(self.failure(chunk, FailureKind::Timeout, e.to_string()));
            }

            debug!("{} attempt {}", label, attempt + 1);
            match self.extractor.extract(&chunk.bytes, &label) {
                Ok(mut partial) => match self.remapper.remap(&mut partial, chunk.pages) {
                    Ok(()) => {
                        info!("{} extracted on attempt {}", label, attempt + 1);
                        return Ok(partial);
                    }
                    Err(e) => {
                        warn!("{} attempt {} rejected: {}", label, attempt + 1, e);
                        last_error = e.reason;
                    }
                },
                Err(e) => {
                    warn!("{} attempt {} failed: {}", label, attempt + 1, e);
                    last_error = e.reason;
                }
            }
        }

        Err(self.failure(chunk, FailureKind::RetriesExhausted, last_error))
    }

    fn failure(&self, chunk: &Chunk, kind: FailureKind, last_error: String) -> ChunkFailure {
        ChunkFailure {
            chunk_index: chunk.index,
            pages: chunk.pages,
            kind,
            last_error,
        }
    }
}
