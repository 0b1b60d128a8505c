use crate::{store::JobStore, util::lock};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Completed-work counters derived from the filled result slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed_pages: u32,
    pub processed_chunks: u32,
}

/// Receives a snapshot after each completed chunk. Called from worker threads.
pub trait ProgressSink: Sync {
    fn record(&self, snapshot: ProgressSnapshot);
}

impl<F: Fn(ProgressSnapshot) + Sync> ProgressSink for F {
    fn record(&self, snapshot: ProgressSnapshot) {
        self(snapshot)
    }
}

/// Persists progress for polling clients.
///
/// Workers race to deliver snapshots, so anything not newer than the last
/// persisted one is dropped; the stored counters never go backwards.
pub struct ProgressTracker<'a> {
    store: &'a dyn JobStore,
    job_id: String,
    last: Mutex<ProgressSnapshot>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(store: &'a dyn JobStore, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            last: Mutex::new(ProgressSnapshot::default()),
        }
    }

    pub fn last_persisted(&self) -> ProgressSnapshot {
        *lock(&self.last)
    }
}

impl ProgressSink for ProgressTracker<'_> {
    fn record(&self, snapshot: ProgressSnapshot) {
        let mut last = lock(&self.last);
        if snapshot.processed_chunks <= last.processed_chunks {
            debug!(
                "stale progress {}/{} ignored",
                snapshot.processed_chunks, last.processed_chunks
            );
            return;
        }

        let res = self.store.update(&self.job_id, &mut |job| {
            job.record_progress(snapshot.processed_pages, snapshot.processed_chunks)?;
            Ok(())
        });
        match res {
            Ok(job) => {
                debug!(
                    job_id = %self.job_id,
                    pages = job.processed_pages,
                    chunks = job.processed_chunks,
                    "progress persisted"
                );
                *last = snapshot;
            }
            Err(e) => warn!(job_id = %self.job_id, "persisting progress failed: {e:#}"),
        }
    }
}
