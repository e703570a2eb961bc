use chrono::NaiveDateTime;
use serde::Serialize;

use crate::db::models::{Job, JobId, JobStatus};

/// Response for a newly submitted job
#[derive(Serialize)]
pub struct SubmitJobResponse {
    pub id: JobId,
    pub status: JobStatus,
}

impl From<&Job> for SubmitJobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
        }
    }
}

/// Current state of a job as returned to pollers
#[derive(Serialize)]
pub struct JobStatusResponse {
    pub id: JobId,
    pub target: String,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            target: job.target,
            status: job.status,
            result: job.result,
            created_at: job.created_at,
        }
    }
}
