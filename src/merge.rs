//! Deterministic combination of per-chunk partial results.
//!
//! Buckets keep chunk-index order (items are appended, never interleaved by
//! page and never deduplicated). Only the debug list is reordered, ascending
//! by page. Both orderings are visible to consumers and must not change.

use crate::{chunk_plan::PageRange, config::Config, engine::PartialResult, error::PipelineError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub buckets: BTreeMap<String, Vec<Value>>,
    pub metadata: Map<String, Value>,
    pub debug_pages: Vec<Value>,
}

impl UnifiedResult {
    pub fn bucket(&self, name: &str) -> &[Value] {
        self.buckets.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct MergeEngine {
    buckets: Vec<String>,
    nested_objects: Vec<String>,
    debug_key: String,
    page_field: String,
}

impl MergeEngine {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            buckets: cfg.merge.buckets.clone(),
            nested_objects: cfg.merge.nested_objects.clone(),
            debug_key: cfg.merge.debug_key.clone(),
            page_field: cfg.merge.page_field.clone(),
        }
    }

    /// Unified structure with every named bucket present and empty.
    pub fn empty(&self) -> UnifiedResult {
        UnifiedResult {
            buckets: self
                .buckets
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect(),
            ..Default::default()
        }
    }

    /// `results` pairs each chunk's page range with its partial result, in
    /// chunk-index order.
    pub fn merge(&self, results: &[(PageRange, PartialResult)]) -> Result<UnifiedResult, PipelineError> {
        let mut unified = self.empty();

        for (chunk_index, (pages, partial)) in results.iter().enumerate() {
            let at = (chunk_index, *pages);
            for (key, value) in partial {
                if key == &self.debug_key {
                    let entries = self.expect_array(at, key, value)?;
                    for entry in entries {
                        self.page_of(at, entry)?;
                        unified.debug_pages.push(entry.clone());
                    }
                } else if let Some(bucket) = unified.buckets.get_mut(key) {
                    let items = self.expect_array(at, key, value)?;
                    bucket.extend(items.iter().cloned());
                } else if self.nested_objects.iter().any(|n| n == key) {
                    merge_nested(&mut unified.metadata, key, value);
                } else {
                    unified.metadata.insert(key.clone(), value.clone());
                }
            }
        }

        // Stable sort: entries sharing a page keep chunk order.
        unified
            .debug_pages
            .sort_by_key(|entry| entry.get(self.page_field.as_str()).and_then(Value::as_u64));

        debug!(
            "merged chunks={} debug_pages={} buckets={:?}",
            results.len(),
            unified.debug_pages.len(),
            unified
                .buckets
                .iter()
                .map(|(k, v)| (k.as_str(), v.len()))
                .collect::<Vec<_>>()
        );
        Ok(unified)
    }

    fn expect_array<'v>(
        &self,
        (chunk_index, pages): (usize, PageRange),
        key: &str,
        value: &'v Value,
    ) -> Result<&'v Vec<Value>, PipelineError> {
        value.as_array().ok_or_else(|| PipelineError::MergeFailure {
            chunk_index,
            pages,
            reason: format!("`{key}` is not an array"),
        })
    }

    fn page_of(
        &self,
        (chunk_index, pages): (usize, PageRange),
        entry: &Value,
    ) -> Result<u64, PipelineError> {
        entry
            .get(self.page_field.as_str())
            .and_then(Value::as_u64)
            .ok_or_else(|| PipelineError::MergeFailure {
                chunk_index,
                pages,
                reason: format!(
                    "`{}` entry without integer `{}`",
                    self.debug_key, self.page_field
                ),
            })
    }
}

/// Shallow last-write-wins, except array sub-fields of two objects are concatenated.
fn merge_nested(metadata: &mut Map<String, Value>, key: &str, value: &Value) {
    if let (Some(Value::Object(existing)), Value::Object(incoming)) = (metadata.get_mut(key), value)
    {
        for (sub_key, sub_value) in incoming {
            match (existing.get_mut(sub_key), sub_value) {
                (Some(Value::Array(acc)), Value::Array(more)) => acc.extend(more.iter().cloned()),
                _ => {
                    existing.insert(sub_key.clone(), sub_value.clone());
                }
            }
        }
        return;
    }
    metadata.insert(key.to_string(), value.clone());
}
