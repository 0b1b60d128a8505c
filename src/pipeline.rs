use crate::{
    chunk_plan::ChunkPlan,
    config::Config,
    deadline::JobDeadline,
    engine::{Extractor, Normalizer, PageSplitter},
    error::PipelineError,
    job::{Job, JobStatus},
    merge::{MergeEngine, UnifiedResult},
    pool::WorkerPool,
    probe,
    progress::ProgressTracker,
    report::JobView,
    retry::{ChunkProcessor, PageRemapper, RetryPolicy},
    store::{BlobStore, JobStore},
    util::sha256_hex,
};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, info_span, warn};

/// Drives a job from `pending` to `done` or `error`.
pub struct Pipeline {
    cfg: Config,
    extractor: Arc<dyn Extractor>,
    splitter: Arc<dyn PageSplitter>,
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    normalizer: Option<Arc<dyn Normalizer>>,
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        extractor: Arc<dyn Extractor>,
        splitter: Arc<dyn PageSplitter>,
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            extractor,
            splitter,
            jobs,
            blobs,
            normalizer: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn jobs(&self) -> &dyn JobStore {
        self.jobs.as_ref()
    }

    /// Stores the document and records a `pending` job for it.
    pub fn submit(&self, document: &[u8], source_name: &str) -> Result<String> {
        let digest = sha256_hex(document);
        let key = self
            .blobs
            .upload(document, &format!("{digest}.pdf"))
            .with_context(|| format!("uploading {source_name}"))?;
        let job = Job::new(source_name, key, digest);
        self.jobs.create(&job)?;
        info!(job_id = %job.id, "submitted {} ({} bytes)", source_name, document.len());
        Ok(job.id)
    }

    pub fn run(&self, document: &[u8], source_name: &str) -> Result<Job> {
        let job_id = self.submit(document, source_name)?;
        self.process(&job_id)
    }

    pub fn status(&self, job_id: &str) -> Result<Option<JobView>> {
        Ok(self.jobs.get(job_id)?.as_ref().map(JobView::from))
    }

    /// Processes a `pending` job to a terminal state and returns the final record.
    ///
    /// Job-level failures end up on the record; `Err` means the store itself failed.
    pub fn process(&self, job_id: &str) -> Result<Job> {
        let span = info_span!("job", job_id = %job_id);
        let _guard = span.enter();

        let job = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| anyhow!("job `{job_id}` not found"))?;
        if job.status != JobStatus::Pending {
            return Err(anyhow!(
                "job `{job_id}` is {}; only pending jobs can be processed",
                job.status
            ));
        }

        let document = match self.blobs.download(&job.blob_key) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(job_id, format!("download failed: {e:#}")),
        };

        let plan = match probe::probe_document(&self.cfg, self.splitter.as_ref(), &document)
            .map_err(|e| format!("{e:#}"))
            .and_then(|p| {
                ChunkPlan::from_page_count(&self.cfg, p.page_count).map_err(|e| e.to_string())
            }) {
            Ok(plan) => plan,
            Err(message) => return self.fail(job_id, message),
        };

        let total_chunks = plan.chunks.len() as u32;
        let job = self.jobs.update(job_id, &mut |j| {
            j.start(plan.page_count, total_chunks)?;
            Ok(())
        })?;
        info!(
            "processing {} pages={} chunks={} pages_per_chunk={}",
            job.source_name, plan.page_count, total_chunks, plan.pages_per_chunk
        );

        let started_at = job.started_at.unwrap_or_else(OffsetDateTime::now_utc);
        let deadline = JobDeadline::new(started_at, self.cfg.limits.job_budget());

        let unified = match self.execute(job_id, &plan, &document, &deadline) {
            Ok(unified) => unified,
            Err(e) => return self.fail(job_id, format!("{e:#}")),
        };

        let job = self.jobs.update(job_id, &mut |j| {
            j.complete(unified.clone())?;
            Ok(())
        })?;
        info!(
            "done in {:?}; debug_pages={}",
            deadline.elapsed(),
            unified.debug_pages.len()
        );

        Ok(self.normalize(job))
    }

    fn execute(
        &self,
        job_id: &str,
        plan: &ChunkPlan,
        document: &[u8],
        deadline: &JobDeadline,
    ) -> Result<UnifiedResult> {
        let chunks = plan.materialize(self.splitter.as_ref(), document)?;

        let processor = ChunkProcessor::new(
            self.extractor.as_ref(),
            RetryPolicy::from_config(&self.cfg),
            PageRemapper::from_config(&self.cfg),
        );
        let pool = WorkerPool::new(&processor, self.cfg.workers.max_parallel_chunks);
        let tracker = ProgressTracker::new(self.jobs.as_ref(), job_id);

        let partials = pool
            .run(&chunks, deadline, &tracker)
            .into_results()
            .map_err(PipelineError::from)?;
        let results: Vec<_> = plan.chunks.iter().copied().zip(partials).collect();

        deadline.check()?;

        let unified = MergeEngine::from_config(&self.cfg).merge(&results)?;
        Ok(unified)
    }

    fn fail(&self, job_id: &str, message: String) -> Result<Job> {
        error!("job failed: {message}");
        self.jobs.update(job_id, &mut |j| {
            j.fail(message.clone())?;
            Ok(())
        })
    }

    /// Best effort: a failure here is logged and the job stays `done`.
    fn normalize(&self, job: Job) -> Job {
        let Some(normalizer) = &self.normalizer else {
            return job;
        };
        let Some(result) = job.result.as_ref() else {
            return job;
        };

        let normalized = match normalizer.normalize(result, &job.source_name) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}", PipelineError::Normalization(format!("{e:#}")));
                return job;
            }
        };

        match self.jobs.update(&job.id, &mut |j| {
            j.set_normalized(normalized.clone())?;
            Ok(())
        }) {
            Ok(updated) => updated,
            Err(e) => {
                warn!("storing normalized result failed: {e:#}");
                job
            }
        }
    }
}
