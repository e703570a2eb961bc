use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use sqlx::{Pool, Sqlite};
use tracing::{error, info, warn};

use crate::api::validation::ErrorResponse;
use crate::db::job_repository::{JobRepository, StoreError};
use crate::db::models::{Job, JobId};
use crate::worker::JobNotifier;

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Target was empty or blank; no job was created
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// No job with this id
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Store operation failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ServiceError::InvalidTarget(msg) => {
                warn!("Invalid target: {}", msg);
                ErrorResponse {
                    error: "Validation failed".to_string(),
                    fields: serde_json::json!({"target": {"errors": [msg]}}),
                }
            }
            ServiceError::NotFound(id) => {
                warn!("Job not found: {}", id);
                ErrorResponse {
                    error: "Not found".to_string(),
                    fields: serde_json::json!({"message": format!("Job with id {} not found", id)}),
                }
            }
            ServiceError::StoreUnavailable(e) => {
                error!("Store error: {}", e);
                // Store details stay in the logs.
                ErrorResponse {
                    error: "Failed to process request".to_string(),
                    fields: serde_json::json!({"message": "Job store unavailable"}),
                }
            }
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Job service used by request handlers
///
/// Touches only the store and the worker notifier, never the fetcher, so
/// requests are not held up by a slow lookup.
pub struct JobService {
    pool: Pool<Sqlite>,
    notifier: JobNotifier,
}

impl JobService {
    /// Create a new JobService instance
    pub fn new(pool: Pool<Sqlite>, notifier: JobNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Queue a lookup for `target`
    ///
    /// # Returns
    /// - `Ok(Job)` - Job stored as `queued` and the worker notified
    /// - `Err(ServiceError::InvalidTarget)` - Target empty or blank, nothing stored
    /// - `Err(ServiceError::StoreUnavailable)` - Insert failed
    pub async fn submit(&self, target: &str) -> Result<Job, ServiceError> {
        if target.trim().is_empty() {
            return Err(ServiceError::InvalidTarget(
                "Target must not be empty".to_string(),
            ));
        }

        let job = JobRepository::enqueue(&self.pool, target).await?;
        info!("Service: Job {} queued for target={}", job.id, job.target);

        self.notifier.notify(job.id);
        Ok(job)
    }

    /// Current state of job `job_id`
    pub async fn status(&self, job_id: JobId) -> Result<Job, ServiceError> {
        JobRepository::get(&self.pool, job_id)
            .await?
            .ok_or(ServiceError::NotFound(job_id))
    }
}
