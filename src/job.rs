use crate::{error::JobStateError, merge::UnifiedResult, util::new_job_id};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document's end-to-end processing run, as persisted in the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub source_name: String,
    pub blob_key: String,
    pub source_sha256: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub total_pages: u32,
    pub processed_pages: u32,
    pub total_chunks: u32,
    pub processed_chunks: u32,
    #[serde(default)]
    pub result: Option<UnifiedResult>,
    #[serde(default)]
    pub normalized_result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    pub fn new(
        source_name: impl Into<String>,
        blob_key: impl Into<String>,
        source_sha256: impl Into<String>,
    ) -> Self {
        let source_sha256 = source_sha256.into();
        let now = OffsetDateTime::now_utc();
        Self {
            id: new_job_id(),
            status: JobStatus::Pending,
            source_name: source_name.into(),
            blob_key: blob_key.into(),
            source_sha256,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            total_pages: 0,
            processed_pages: 0,
            total_chunks: 0,
            processed_chunks: 0,
            result: None,
            normalized_result: None,
            error: None,
        }
    }

    /// `pending -> processing`. Sets `started_at` and the totals, once.
    pub fn start(&mut self, total_pages: u32, total_chunks: u32) -> Result<(), JobStateError> {
        self.require(JobStatus::Pending, JobStatus::Processing)?;
        if self.started_at.is_some() || self.total_pages != 0 || self.total_chunks != 0 {
            return Err(JobStateError::TotalsAlreadySet {
                job_id: self.id.clone(),
            });
        }
        let now = OffsetDateTime::now_utc();
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.total_pages = total_pages;
        self.total_chunks = total_chunks;
        self.updated_at = now;
        Ok(())
    }

    /// Counters only move forward; a smaller value is ignored.
    pub fn record_progress(
        &mut self,
        processed_pages: u32,
        processed_chunks: u32,
    ) -> Result<(), JobStateError> {
        if self.status != JobStatus::Processing {
            return Err(self.invalid(JobStatus::Processing));
        }
        if processed_pages > self.total_pages {
            return Err(JobStateError::ProgressOutOfRange {
                job_id: self.id.clone(),
                unit: "pages",
                processed: processed_pages,
                total: self.total_pages,
            });
        }
        if processed_chunks > self.total_chunks {
            return Err(JobStateError::ProgressOutOfRange {
                job_id: self.id.clone(),
                unit: "chunks",
                processed: processed_chunks,
                total: self.total_chunks,
            });
        }
        self.processed_pages = self.processed_pages.max(processed_pages);
        self.processed_chunks = self.processed_chunks.max(processed_chunks);
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// `processing -> done`.
    pub fn complete(&mut self, result: UnifiedResult) -> Result<(), JobStateError> {
        self.require(JobStatus::Processing, JobStatus::Done)?;
        let now = OffsetDateTime::now_utc();
        self.status = JobStatus::Done;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `pending | processing -> error`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(self.invalid(JobStatus::Error));
        }
        let now = OffsetDateTime::now_utc();
        self.status = JobStatus::Error;
        self.result = None;
        self.error = Some(message.into());
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Attaches the secondary normalized output. Only valid once `done`.
    pub fn set_normalized(&mut self, normalized: serde_json::Value) -> Result<(), JobStateError> {
        if self.status != JobStatus::Done {
            return Err(self.invalid(JobStatus::Done));
        }
        self.normalized_result = Some(normalized);
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    fn require(&self, from: JobStatus, to: JobStatus) -> Result<(), JobStateError> {
        if self.status != from {
            return Err(self.invalid(to));
        }
        Ok(())
    }

    fn invalid(&self, to: JobStatus) -> JobStateError {
        JobStateError::InvalidTransition {
            job_id: self.id.clone(),
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }
}
