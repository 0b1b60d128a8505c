mod common;

use anyhow::{Result, bail};
use common::{FakeSplitter, ScriptedExtractor};
use quack_extract::{
    config::Config,
    engine::{Extractor, Normalizer},
    error::ExtractionFailure,
    job::JobStatus,
    merge::UnifiedResult,
    pipeline::Pipeline,
    store::{BlobStore, JobStore, MemoryBlobStore, MemoryJobStore},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.retry.backoff_seconds = vec![0, 0];
    cfg.workers.max_parallel_chunks = 2;
    cfg
}

struct Harness {
    pipeline: Pipeline,
    jobs: Arc<MemoryJobStore>,
}

fn harness(cfg: &Config, extractor: Arc<dyn Extractor>) -> Harness {
    let jobs = Arc::new(MemoryJobStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let pipeline = Pipeline::new(cfg, extractor, Arc::new(FakeSplitter), jobs.clone(), blobs);
    Harness { pipeline, jobs }
}

struct UpperTitle;

impl Normalizer for UpperTitle {
    fn normalize(&self, unified: &UnifiedResult, source_name: &str) -> Result<Value> {
        let title = unified.metadata["title"].as_str().unwrap_or_default();
        Ok(json!({ "source": source_name, "title": title.to_uppercase() }))
    }
}

struct BrokenNormalizer;

impl Normalizer for BrokenNormalizer {
    fn normalize(&self, _: &UnifiedResult, _: &str) -> Result<Value> {
        bail!("normalizer crashed")
    }
}

#[test]
fn twelve_pages_in_chunks_of_five_reach_done() {
    let cfg = test_config();
    let extractor = Arc::new(ScriptedExtractor::echo());
    let h = harness(&cfg, extractor.clone());

    let job = h
        .pipeline
        .run(&common::fake_document(12), "client-a.pdf")
        .unwrap();

    assert_eq!(job.status, JobStatus::Done, "error: {:?}", job.error);
    assert_eq!((job.total_pages, job.processed_pages), (12, 12));
    assert_eq!((job.total_chunks, job.processed_chunks), (3, 3));
    assert!(job.started_at.is_some() && job.finished_at.is_some());
    assert_eq!(extractor.calls(), 3);

    let result = job.result.expect("result on done job");
    let pages: Vec<u64> = result
        .debug_pages
        .iter()
        .map(|d| d["page"].as_u64().unwrap())
        .collect();
    assert_eq!(pages, (1..=12).collect::<Vec<u64>>());
    assert_eq!(
        result.bucket("work_items"),
        &[json!("item-from-1"), json!("item-from-6"), json!("item-from-11")]
    );
    assert_eq!(result.metadata["title"], json!("chunk starting 11"));
    assert!(result.bucket("nutrition_items").is_empty());
}

#[test]
fn single_chunk_document_sends_whole_file() {
    let cfg = test_config();
    let extractor = Arc::new(ScriptedExtractor::echo());
    let h = harness(&cfg, extractor.clone());

    let job = h.pipeline.run(&common::fake_document(4), "small.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.total_chunks, 1);
    assert_eq!(extractor.labels(), vec!["chunk 0 (pages 1-4)".to_string()]);
}

#[test]
fn permanent_chunk_failure_fails_the_job() {
    let mut cfg = test_config();
    cfg.workers.max_parallel_chunks = 1;
    // Chunk 0 answers with a bucket that would fail the merge if it ever ran.
    let extractor = Arc::new(ScriptedExtractor::new(|bytes, label, _| {
        if label.starts_with("chunk 2 ") {
            Err(ExtractionFailure::new("unreadable scan"))
        } else if label.starts_with("chunk 0 ") {
            let mut partial = common::echo_partial(bytes);
            partial.insert("notes".into(), json!("not a list"));
            Ok(partial)
        } else {
            Ok(common::echo_partial(bytes))
        }
    }));
    let h = harness(&cfg, extractor.clone());

    let job = h.pipeline.run(&common::fake_document(25), "bad.pdf").unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.result.is_none());
    let message = job.error.expect("error message");
    assert_eq!(message, "chunk 2 (pages 11-15) failed: unreadable scan");
    assert_eq!(extractor.attempts_for("chunk 2 (pages 11-15)"), 3);
    assert_eq!(extractor.attempts_for("chunk 3 (pages 16-20)"), 0);
    // Progress reflects only chunks 0 and 1.
    assert_eq!((job.processed_pages, job.processed_chunks), (10, 2));
}

#[test]
fn empty_document_fails_before_processing() {
    let cfg = test_config();
    let extractor = Arc::new(ScriptedExtractor::echo());
    let h = harness(&cfg, extractor.clone());

    let job = h.pipeline.run(&common::fake_document(0), "empty.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.started_at.is_none());
    assert!(job.error.unwrap().contains("zero pages"));
    assert_eq!(extractor.calls(), 0);
}

#[test]
fn page_limit_is_enforced() {
    let mut cfg = test_config();
    cfg.limits.max_input_pages = 10;
    let h = harness(&cfg, Arc::new(ScriptedExtractor::echo()));

    let job = h.pipeline.run(&common::fake_document(11), "big.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("max_input_pages"));
}

#[test]
fn merge_failure_fails_the_job() {
    let cfg = test_config();
    let extractor = Arc::new(ScriptedExtractor::new(|_, _, _| {
        Ok(json!({ "notes": "not a list" }).as_object().unwrap().clone())
    }));
    let h = harness(&cfg, extractor);

    let job = h.pipeline.run(&common::fake_document(3), "odd.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(
        job.error
            .unwrap()
            .starts_with("merge failed for chunk 0 (pages 1-3)")
    );
}

#[test]
fn job_timeout_fails_the_job() {
    let mut cfg = test_config();
    cfg.limits.job_timeout_seconds = 1;
    cfg.workers.max_parallel_chunks = 1;
    let extractor =
        Arc::new(ScriptedExtractor::echo().with_delay(Duration::from_millis(600)));
    let h = harness(&cfg, extractor.clone());

    let job = h.pipeline.run(&common::fake_document(20), "slow.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("job timeout exceeded"));
    assert!(extractor.calls() < 4);
}

#[test]
fn normalizer_output_is_attached() {
    let cfg = test_config();
    let h = harness(&cfg, Arc::new(ScriptedExtractor::echo()));
    let pipeline = h.pipeline.with_normalizer(Arc::new(UpperTitle));

    let job = pipeline.run(&common::fake_document(6), "n.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(
        job.normalized_result,
        Some(json!({ "source": "n.pdf", "title": "CHUNK STARTING 6" }))
    );
}

#[test]
fn normalizer_failure_keeps_job_done() {
    let cfg = test_config();
    let h = harness(&cfg, Arc::new(ScriptedExtractor::echo()));
    let pipeline = h.pipeline.with_normalizer(Arc::new(BrokenNormalizer));

    let job = pipeline.run(&common::fake_document(6), "n.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.result.is_some());
    assert!(job.normalized_result.is_none());
    assert!(job.error.is_none());
}

#[test]
fn only_pending_jobs_are_processed() {
    let cfg = test_config();
    let h = harness(&cfg, Arc::new(ScriptedExtractor::echo()));

    let job = h.pipeline.run(&common::fake_document(2), "x.pdf").unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(h.pipeline.process(&job.id).is_err());
    assert!(h.pipeline.process("no-such-job").is_err());
}

#[test]
fn status_view_hides_result_until_done() {
    let cfg = test_config();
    let h = harness(&cfg, Arc::new(ScriptedExtractor::echo()));

    let id = h
        .pipeline
        .submit(&common::fake_document(7), "later.pdf")
        .unwrap();
    let view = h.pipeline.status(&id).unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.progress.total_pages, 0);
    assert!(view.result.is_none());

    h.pipeline.process(&id).unwrap();
    let view = h.pipeline.status(&id).unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert_eq!(view.progress.processed_pages, 7);
    assert!(view.result.is_some());

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["status"], json!("done"));
    assert!(json.get("error").is_none());

    assert!(h.pipeline.status("missing").unwrap().is_none());
}

#[test]
fn polled_progress_never_decreases() {
    let mut cfg = test_config();
    cfg.chunking.pages_per_chunk = 2;
    cfg.workers.max_parallel_chunks = 3;
    let extractor = Arc::new(ScriptedExtractor::echo().with_delay(Duration::from_millis(10)));
    let h = harness(&cfg, extractor);

    let id = h
        .pipeline
        .submit(&common::fake_document(30), "poll.pdf")
        .unwrap();
    let finished = AtomicBool::new(false);

    std::thread::scope(|s| {
        let jobs = h.jobs.as_ref();
        let finished = &finished;
        let id = id.as_str();
        let poller = s.spawn(move || {
            let mut last = (0, 0);
            let mut samples = 0;
            loop {
                let done = finished.load(Ordering::SeqCst);
                let job = jobs.get(id).unwrap().unwrap();
                let now = (job.processed_pages, job.processed_chunks);
                assert!(now.0 >= last.0 && now.1 >= last.1, "{last:?} -> {now:?}");
                assert!(job.processed_chunks <= job.total_chunks);
                last = now;
                samples += 1;
                if done {
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            samples
        });

        let job = h.pipeline.process(id).unwrap();
        finished.store(true, Ordering::SeqCst);
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.processed_chunks, 15);
        assert!(poller.join().unwrap() > 0);
    });
}
