use crate::{
    chunk_plan::Chunk,
    deadline::JobDeadline,
    engine::PartialResult,
    error::ChunkFailure,
    progress::{ProgressSink, ProgressSnapshot},
    retry::{ChunkProcessor, ChunkResult},
    util::lock,
};
use std::sync::Mutex;
use tracing::{debug, error, info};

/// Fixed-size set of scoped worker threads sharing one chunk cursor.
pub struct WorkerPool<'a> {
    processor: &'a ChunkProcessor<'a>,
    max_workers: usize,
}

#[derive(Debug)]
pub struct PoolOutcome {
    /// One slot per chunk index; `None` only when the pool stopped early.
    pub slots: Vec<Option<ChunkResult>>,
    /// First permanent failure, if any. Later failures are discarded.
    pub failure: Option<ChunkFailure>,
}

impl PoolOutcome {
    /// All partial results in chunk-index order, or the job-aborting failure.
    pub fn into_results(self) -> Result<Vec<PartialResult>, ChunkFailure> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match slot {
                Some(Ok(partial)) => out.push(partial),
                Some(Err(failure)) => return Err(failure),
                None => unreachable!("pool finished without failure but left a slot empty"),
            }
        }
        Ok(out)
    }
}

struct Board {
    next: usize,
    failure: Option<ChunkFailure>,
    slots: Vec<Option<ChunkResult>>,
}

impl Board {
    fn progress(&self, chunks: &[Chunk]) -> ProgressSnapshot {
        let mut snap = ProgressSnapshot::default();
        for (slot, chunk) in self.slots.iter().zip(chunks) {
            if matches!(slot, Some(Ok(_))) {
                snap.processed_pages += chunk.pages.page_count();
                snap.processed_chunks += 1;
            }
        }
        snap
    }
}

impl<'a> WorkerPool<'a> {
    pub fn new(processor: &'a ChunkProcessor<'a>, max_workers: usize) -> Self {
        Self {
            processor,
            max_workers: max_workers.max(1),
        }
    }

    /// Blocks until every worker has exited, including attempts still in
    /// flight when the first failure was recorded.
    pub fn run(
        &self,
        chunks: &[Chunk],
        deadline: &JobDeadline,
        progress: &dyn ProgressSink,
    ) -> PoolOutcome {
        let workers = self.max_workers.min(chunks.len());
        let board = Mutex::new(Board {
            next: 0,
            failure: None,
            slots: vec![None; chunks.len()],
        });

        info!("pool start chunks={} workers={}", chunks.len(), workers);
        std::thread::scope(|s| {
            for worker in 0..workers {
                let board = &board;
                s.spawn(move || self.worker_loop(worker, chunks, board, deadline, progress));
            }
        });

        let board = board.into_inner().unwrap_or_else(|p| p.into_inner());
        PoolOutcome {
            slots: board.slots,
            failure: board.failure,
        }
    }

    fn worker_loop(
        &self,
        worker: usize,
        chunks: &[Chunk],
        board: &Mutex<Board>,
        deadline: &JobDeadline,
        progress: &dyn ProgressSink,
    ) {
        loop {
            let index = {
                let mut b = lock(board);
                if b.failure.is_some() || b.next >= chunks.len() {
                    break;
                }
                let index = b.next;
                b.next += 1;
                index
            };

            let chunk = &chunks[index];
            debug!("worker {} claimed {}", worker, chunk.label());
            let outcome = self.processor.process(chunk, deadline);

            let snapshot = {
                let mut b = lock(board);
                if b.failure.is_some() {
                    debug!("worker {} discards {} after job failure", worker, chunk.label());
                    continue;
                }
                match outcome {
                    Ok(partial) => {
                        b.slots[index] = Some(Ok(partial));
                        b.progress(chunks)
                    }
                    Err(failure) => {
                        error!("{}", failure);
                        b.slots[index] = Some(Err(failure.clone()));
                        b.failure = Some(failure);
                        continue;
                    }
                }
            };
            progress.record(snapshot);
        }
        debug!("worker {} exit", worker);
    }
}
