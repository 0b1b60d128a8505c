mod common;

use common::ScriptedExtractor;
use quack_extract::{
    chunk_plan::{Chunk, PageRange},
    config::Config,
    deadline::JobDeadline,
    error::{ExtractionFailure, FailureKind},
    retry::{ChunkProcessor, PageRemapper, RetryPolicy},
};
use serde_json::json;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

fn chunk(index: usize, start: u32, end: u32) -> Chunk {
    Chunk {
        index,
        pages: PageRange {
            start_page: start,
            end_page: end,
        },
        bytes: format!("pages:{start}-{end}").into_bytes(),
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: vec![Duration::from_millis(5), Duration::from_millis(10)],
    }
}

fn remapper() -> PageRemapper {
    PageRemapper::from_config(&Config::default())
}

fn fresh_deadline() -> JobDeadline {
    JobDeadline::new(OffsetDateTime::now_utc(), Duration::from_secs(60))
}

#[test]
fn default_policy_is_two_retries_two_then_four_seconds() {
    let p = RetryPolicy::default();
    assert_eq!(p.max_retries, 2);
    assert_eq!(p.delay_for(1), Duration::from_secs(2));
    assert_eq!(p.delay_for(2), Duration::from_secs(4));
    assert_eq!(p.delay_for(3), Duration::from_secs(4));

    let from_cfg = RetryPolicy::from_config(&Config::default());
    assert_eq!(from_cfg.backoff, p.backoff);
}

#[test]
fn local_pages_become_document_pages() {
    let extractor = ScriptedExtractor::new(|_, _, _| {
        Ok(json!({
            "debug_pages": [{ "page": 3 }],
            "notes": [{ "page": 1, "text": "n" }, "plain"]
        })
        .as_object()
        .unwrap()
        .clone())
    });
    let processor = ChunkProcessor::new(&extractor, fast_policy(), remapper());
    let out = processor.process(&chunk(2, 11, 15), &fresh_deadline()).unwrap();
    assert_eq!(out["debug_pages"], json!([{ "page": 13 }]));
    assert_eq!(out["notes"], json!([{ "page": 11, "text": "n" }, "plain"]));
}

#[test]
fn succeeds_after_transient_failures() {
    let extractor = ScriptedExtractor::new(|bytes, _, attempt| {
        if attempt < 3 {
            Err(ExtractionFailure::new(format!("flaky {attempt}")))
        } else {
            Ok(common::echo_partial(bytes))
        }
    });
    let processor = ChunkProcessor::new(&extractor, fast_policy(), remapper());
    let out = processor.process(&chunk(0, 1, 5), &fresh_deadline());
    assert!(out.is_ok());
    assert_eq!(extractor.calls(), 3);
}

#[test]
fn exhausted_retries_report_last_error() {
    let extractor = ScriptedExtractor::new(|_, _, attempt| {
        Err(ExtractionFailure::new(format!("boom {attempt}")))
    });
    let processor = ChunkProcessor::new(&extractor, fast_policy(), remapper());
    let failure = processor
        .process(&chunk(3, 16, 20), &fresh_deadline())
        .unwrap_err();
    assert_eq!(extractor.calls(), 3);
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(failure.chunk_index, 3);
    assert_eq!(failure.last_error, "boom 3");
    assert_eq!(failure.to_string(), "chunk 3 (pages 16-20) failed: boom 3");
}

#[test]
fn exceeded_budget_skips_the_call() {
    let extractor = ScriptedExtractor::echo();
    let processor = ChunkProcessor::new(&extractor, fast_policy(), remapper());
    let started = OffsetDateTime::now_utc() - time::Duration::minutes(41);
    let deadline = JobDeadline::new(started, Duration::from_secs(40 * 60));

    let failure = processor.process(&chunk(0, 1, 5), &deadline).unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(extractor.calls(), 0);
}

#[test]
fn retry_after_budget_fails_without_backoff_sleep() {
    let extractor = ScriptedExtractor::new(|_, _, _| Err(ExtractionFailure::new("slow failure")))
        .with_delay(Duration::from_millis(120));
    // Default 2s/4s backoff: sleeping through it would blow the elapsed check below.
    let processor = ChunkProcessor::new(&extractor, RetryPolicy::default(), remapper());
    let deadline = JobDeadline::new(OffsetDateTime::now_utc(), Duration::from_millis(50));

    let t0 = Instant::now();
    let failure = processor.process(&chunk(1, 6, 10), &deadline).unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(extractor.calls(), 1);
    assert!(t0.elapsed() < Duration::from_secs(1), "slept {:?}", t0.elapsed());
}

#[test]
fn backoff_longer_than_remaining_budget_times_out_at_once() {
    let extractor = ScriptedExtractor::new(|_, _, _| Err(ExtractionFailure::new("nope")));
    let policy = RetryPolicy {
        max_retries: 2,
        backoff: vec![Duration::from_secs(30)],
    };
    let processor = ChunkProcessor::new(&extractor, policy, remapper());
    let deadline = JobDeadline::new(OffsetDateTime::now_utc(), Duration::from_secs(10));

    let t0 = Instant::now();
    let failure = processor.process(&chunk(0, 1, 5), &deadline).unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(extractor.calls(), 1);
    assert!(t0.elapsed() < Duration::from_secs(1));
}

#[test]
fn page_beyond_chunk_span_is_a_failed_attempt() {
    let extractor = ScriptedExtractor::new(|_, _, _| {
        Ok(json!({ "debug_pages": [{ "page": 5_000_000_000u64 }] })
            .as_object()
            .unwrap()
            .clone())
    });
    let processor = ChunkProcessor::new(&extractor, fast_policy(), remapper());
    let failure = processor
        .process(&chunk(2, 11, 15), &fresh_deadline())
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(extractor.calls(), 3);
    assert!(
        failure.last_error.starts_with("malformed extractor payload: page 5000000000"),
        "{}",
        failure.last_error
    );
}

#[test]
fn page_zero_or_past_the_end_is_rejected() {
    let remap = remapper();
    let pages = PageRange {
        start_page: 11,
        end_page: 15,
    };
    for bad in [json!({ "debug_pages": [{ "page": 0 }] }), json!({ "notes": [{ "page": 6 }] })] {
        let mut partial = bad.as_object().unwrap().clone();
        let before = partial.clone();
        assert!(remap.remap(&mut partial, pages).is_err(), "{bad}");
        assert_eq!(partial, before);
    }

    let mut last_page = json!({ "debug_pages": [{ "page": 5 }] }).as_object().unwrap().clone();
    remap.remap(&mut last_page, pages).unwrap();
    assert_eq!(last_page["debug_pages"], json!([{ "page": 15 }]));
}

#[test]
fn bad_page_then_good_answer_succeeds() {
    let extractor = ScriptedExtractor::new(|bytes, _, attempt| {
        if attempt == 1 {
            Ok(json!({ "debug_pages": [{ "page": 99 }] }).as_object().unwrap().clone())
        } else {
            Ok(common::echo_partial(bytes))
        }
    });
    let processor = ChunkProcessor::new(&extractor, fast_policy(), remapper());
    let out = processor.process(&chunk(1, 6, 10), &fresh_deadline()).unwrap();
    assert_eq!(extractor.calls(), 2);
    assert_eq!(out["debug_pages"][0], json!({ "page": 10 }));
}
