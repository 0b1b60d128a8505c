#![allow(dead_code)]

use anyhow::{Result, anyhow};
use quack_extract::{
    chunk_plan::PageRange,
    engine::{Extractor, PageSplitter, PartialResult},
    error::ExtractionFailure,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fake documents are the bytes `pages:N`; slices are `pages:S-E`.
pub fn fake_document(pages: u32) -> Vec<u8> {
    format!("pages:{pages}").into_bytes()
}

pub struct FakeSplitter;

impl PageSplitter for FakeSplitter {
    fn page_count(&self, document: &[u8]) -> Result<u32> {
        let s = std::str::from_utf8(document)?;
        let n = s
            .strip_prefix("pages:")
            .ok_or_else(|| anyhow!("not a fake document"))?;
        Ok(n.parse()?)
    }

    fn slice(&self, _document: &[u8], range: PageRange) -> Result<Vec<u8>> {
        Ok(format!("pages:{}-{}", range.start_page, range.end_page).into_bytes())
    }
}

pub fn parse_slice(bytes: &[u8]) -> (u32, u32) {
    let s = std::str::from_utf8(bytes).unwrap();
    let body = s.strip_prefix("pages:").unwrap();
    match body.split_once('-') {
        Some((a, b)) => (a.parse().unwrap(), b.parse().unwrap()),
        None => (1, body.parse().unwrap()),
    }
}

/// Answers every chunk with one debug entry per page (local numbering,
/// reversed) and one work item naming the chunk's first page.
pub fn echo_partial(bytes: &[u8]) -> PartialResult {
    let (start, end) = parse_slice(bytes);
    let span = end - start + 1;
    let debug: Vec<Value> = (1..=span).rev().map(|p| json!({ "page": p })).collect();
    let out = json!({
        "work_items": [format!("item-from-{start}")],
        "debug_pages": debug,
        "title": format!("chunk starting {start}"),
    });
    out.as_object().unwrap().clone()
}

type Behavior =
    dyn Fn(&[u8], &str, u32) -> Result<PartialResult, ExtractionFailure> + Send + Sync;

/// Extractor whose answer depends on (bytes, label, attempt number for that label).
pub struct ScriptedExtractor {
    behavior: Box<Behavior>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedExtractor {
    pub fn new(
        behavior: impl Fn(&[u8], &str, u32) -> Result<PartialResult, ExtractionFailure>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            behavior: Box::new(behavior),
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn echo() -> Self {
        Self::new(|bytes, _, _| Ok(echo_partial(bytes)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, label: &str) -> u32 {
        self.attempts.lock().unwrap().get(label).copied().unwrap_or(0)
    }

    pub fn labels(&self) -> Vec<String> {
        self.attempts.lock().unwrap().keys().cloned().collect()
    }
}

impl Extractor for ScriptedExtractor {
    fn extract(
        &self,
        chunk_bytes: &[u8],
        chunk_label: &str,
    ) -> Result<PartialResult, ExtractionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(chunk_label.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        (self.behavior)(chunk_bytes, chunk_label, attempt)
    }
}
