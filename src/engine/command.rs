use super::{
    Extractor, Normalizer,
    process::run_with_stdin,
    types::{ExtractOut, NormalizeIn, NormalizeOut, PartialResult},
};
use crate::{
    config::{Config, Extraction, Normalization},
    error::ExtractionFailure,
    merge::UnifiedResult,
};
use anyhow::{Context, Result, anyhow};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Talks to the extraction capability through an external program.
///
/// The chunk bytes go to stdin, the label to `QUACK_CHUNK_LABEL`, and the
/// program answers with an [`ExtractOut`] JSON document on stdout.
pub struct CommandExtractor {
    cfg: Extraction,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.extraction.program.trim().is_empty() {
            return Err(anyhow!("extraction.program must not be empty"));
        }
        Ok(Self {
            cfg: cfg.extraction.clone(),
            timeout: Duration::from_secs(cfg.extraction.timeout_seconds.max(1)),
        })
    }

    fn command(&self, chunk_label: &str) -> Command {
        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.args);
        for (k, v) in &self.cfg.env {
            cmd.env(k, v);
        }
        cmd.env("QUACK_CHUNK_LABEL", chunk_label);
        cmd
    }
}

impl Extractor for CommandExtractor {
    fn extract(
        &self,
        chunk_bytes: &[u8],
        chunk_label: &str,
    ) -> Result<PartialResult, ExtractionFailure> {
        let output = run_with_stdin(self.command(chunk_label), chunk_bytes, Some(self.timeout))
            .map_err(|e| ExtractionFailure::new(format!("{e:#}")))?;

        if !output.status.success() {
            return Err(ExtractionFailure::new(format!(
                "extractor exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let out: ExtractOut = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractionFailure::new(format!("malformed extractor payload: {e}")))?;
        parse_extract_out(out)
    }
}

/// Validates the extractor's envelope; only a JSON object counts as a result.
pub fn parse_extract_out(out: ExtractOut) -> Result<PartialResult, ExtractionFailure> {
    if !out.ok {
        let reason = out
            .error
            .unwrap_or_else(|| "extractor returned ok=false".to_string());
        return Err(ExtractionFailure::new(reason));
    }
    match out.result {
        Some(serde_json::Value::Object(map)) => Ok(map),
        Some(other) => Err(ExtractionFailure::new(format!(
            "malformed extractor payload: expected object, got {}",
            json_kind(&other)
        ))),
        None => Err(ExtractionFailure::new(
            "malformed extractor payload: missing result",
        )),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

pub struct CommandNormalizer {
    cfg: Normalization,
    timeout: Duration,
}

impl CommandNormalizer {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.normalization.program.trim().is_empty() {
            return Err(anyhow!("normalization.program must not be empty"));
        }
        Ok(Self {
            cfg: cfg.normalization.clone(),
            timeout: Duration::from_secs(cfg.normalization.timeout_seconds.max(1)),
        })
    }
}

impl Normalizer for CommandNormalizer {
    fn normalize(&self, unified: &UnifiedResult, source_name: &str) -> Result<serde_json::Value> {
        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.args);
        let req = serde_json::to_vec(&NormalizeIn {
            source_name,
            result: unified,
        })?;

        let output = run_with_stdin(cmd, &req, Some(self.timeout))?;
        if !output.status.success() {
            return Err(anyhow!(
                "normalizer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let out: NormalizeOut = serde_json::from_slice(&output.stdout)
            .with_context(|| "parsing normalizer JSON output")?;
        if !out.ok {
            warn!("normalizer returned ok=false for {source_name}");
            return Err(anyhow!(
                out.error
                    .unwrap_or_else(|| "normalizer returned ok=false".to_string())
            ));
        }
        debug!("normalized {source_name}");
        out.normalized
            .ok_or_else(|| anyhow!("normalizer returned no payload"))
    }
}
