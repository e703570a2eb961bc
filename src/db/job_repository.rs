use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

use crate::db::models::{Job, JobId, JobRow, JobStatus};

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, target, status, result_json, created_at, started_at, finished_at";

/// Failures surfaced by the job store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be reached or the statement failed.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// A terminal transition was attempted on a job that is not running.
    #[error("job {0} is not running")]
    NotRunning(JobId),

    /// A result payload could not be encoded for storage.
    #[error("failed to encode job result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Repository for Job database operations
pub struct JobRepository;

impl JobRepository {
    /// Insert a new job in `queued` state and return the stored record
    pub async fn enqueue(pool: &Pool<Sqlite>, target: &str) -> Result<Job, StoreError> {
        debug!("Enqueueing job: target={}", target);

        let query = format!("INSERT INTO jobs (target, status) VALUES (?, ?) RETURNING {COLUMNS}");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(target)
            .bind(JobStatus::Queued)
            .fetch_one(pool)
            .await?;

        debug!("Job enqueued with id={}", row.id);
        Ok(row.into())
    }

    /// Atomically claim the oldest queued job and mark it `running`.
    ///
    /// Selection and transition happen in one statement, and the outer
    /// `status` guard makes a lost race update zero rows, so any number of
    /// concurrent claimers receive distinct jobs.
    pub async fn claim_next(pool: &Pool<Sqlite>) -> Result<Option<Job>, StoreError> {
        let query = format!(
            "UPDATE jobs \
             SET status = ?1, started_at = ?2 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status = ?3 \
                 ORDER BY id ASC \
                 LIMIT 1 \
             ) AND status = ?3 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Running)
            .bind(Utc::now().naive_utc())
            .bind(JobStatus::Queued)
            .fetch_optional(pool)
            .await?;

        if let Some(row) = &row {
            debug!("Claimed job id={} target={}", row.id, row.target);
        }
        Ok(row.map(Job::from))
    }

    /// Mark a running job `done` with its result payload
    pub async fn complete(
        pool: &Pool<Sqlite>,
        job_id: JobId,
        result: &serde_json::Value,
    ) -> Result<(), StoreError> {
        Self::finish(pool, job_id, JobStatus::Done, result).await
    }

    /// Mark a running job `error` with an error payload
    pub async fn fail(
        pool: &Pool<Sqlite>,
        job_id: JobId,
        error_result: &serde_json::Value,
    ) -> Result<(), StoreError> {
        Self::finish(pool, job_id, JobStatus::Error, error_result).await
    }

    /// Point lookup of a job by id
    pub async fn get(pool: &Pool<Sqlite>, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await?;

        Ok(row.map(Job::from))
    }

    /// Number of jobs currently in `status`
    pub async fn count_by_status(pool: &Pool<Sqlite>, status: JobStatus) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await?;

        Ok(count)
    }

    /// Move jobs left `running` by a previous process to `error`.
    ///
    /// Must only run before a worker starts. Returns the number of jobs swept.
    pub async fn fail_interrupted(pool: &Pool<Sqlite>) -> Result<u64, StoreError> {
        let payload = serde_json::json!({
            "error": "interrupted: process restarted while job was running"
        });

        let result = sqlx::query(
            "UPDATE jobs SET status = ?1, result_json = ?2, finished_at = ?3 WHERE status = ?4",
        )
        .bind(JobStatus::Error)
        .bind(serde_json::to_string(&payload)?)
        .bind(Utc::now().naive_utc())
        .bind(JobStatus::Running)
        .execute(pool)
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            warn!("Marked {} interrupted job(s) as error", swept);
        }
        Ok(swept)
    }

    /// Terminal transition shared by `complete` and `fail`.
    ///
    /// Only a `running` row is touched, which keeps the result write-once.
    async fn finish(
        pool: &Pool<Sqlite>,
        job_id: JobId,
        status: JobStatus,
        result: &serde_json::Value,
    ) -> Result<(), StoreError> {
        debug_assert!(status.is_terminal());
        let result_json = serde_json::to_string(result)?;

        let outcome = sqlx::query(
            "UPDATE jobs SET status = ?1, result_json = ?2, finished_at = ?3 \
             WHERE id = ?4 AND status = ?5",
        )
        .bind(status)
        .bind(result_json)
        .bind(Utc::now().naive_utc())
        .bind(job_id)
        .bind(JobStatus::Running)
        .execute(pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(StoreError::NotRunning(job_id));
        }

        debug!("Job {} finished with status={}", job_id, status);
        Ok(())
    }
}
