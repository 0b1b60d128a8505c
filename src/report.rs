use crate::{
    job::{Job, JobStatus},
    merge::UnifiedResult,
};
use serde::{Deserialize, Serialize};

/// What a polling client sees for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub source_name: String,
    pub progress: ProgressView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UnifiedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_result: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    pub processed_pages: u32,
    pub total_pages: u32,
    pub processed_chunks: u32,
    pub total_chunks: u32,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let done = job.status == JobStatus::Done;
        Self {
            job_id: job.id.clone(),
            status: job.status,
            source_name: job.source_name.clone(),
            progress: ProgressView {
                processed_pages: job.processed_pages,
                total_pages: job.total_pages,
                processed_chunks: job.processed_chunks,
                total_chunks: job.total_chunks,
            },
            error: job.error.clone(),
            result: if done { job.result.clone() } else { None },
            normalized_result: if done {
                job.normalized_result.clone()
            } else {
                None
            },
            created_at: rfc3339(job.created_at),
            updated_at: rfc3339(job.updated_at),
        }
    }
}

fn rfc3339(t: time::OffsetDateTime) -> String {
    t.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
