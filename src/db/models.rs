use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

/// Store-assigned job identifier
pub type JobId = i64;

/// Lifecycle of a job: `queued -> running -> {done, error}`
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// `done` and `error` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database representation of a job with all fields
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub target: String,
    pub status: JobStatus,
    pub result_json: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

/// A job as seen by the API and the worker, with its result decoded
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub target: String,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        // An undecodable payload is reported as absent rather than failing the lookup.
        let result: Option<serde_json::Value> = row.result_json.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .inspect_err(|e| warn!("Job {} has unreadable result payload: {}", row.id, e))
                .ok()
        });

        Job {
            id: row.id,
            target: row.target,
            status: row.status,
            result,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}
