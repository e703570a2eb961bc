use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::error;

use crate::db::job_repository::{JobRepository, StoreError};
use crate::db::models::JobStatus;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<QueueDepth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct QueueDepth {
    queued: i64,
    running: i64,
}

async fn queue_depth(pool: &Pool<Sqlite>) -> Result<QueueDepth, StoreError> {
    Ok(QueueDepth {
        queued: JobRepository::count_by_status(pool, JobStatus::Queued).await?,
        running: JobRepository::count_by_status(pool, JobStatus::Running).await?,
    })
}

/// Health check endpoint
///
/// Checks store connectivity and reports how many jobs are waiting or in
/// progress. Use for uptime monitors.
#[get("/health")]
async fn health_check(pool: web::Data<Pool<Sqlite>>) -> impl Responder {
    match queue_depth(pool.get_ref()).await {
        Ok(depth) => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            database: "connected".to_string(),
            queue: Some(depth),
            error: None,
        }),
        Err(e) => {
            error!("Health check failed: {:?}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unhealthy".to_string(),
                database: "disconnected".to_string(),
                queue: None,
                error: Some(format!("Database error: {}", e)),
            })
        }
    }
}

/// Readiness check endpoint
///
/// Returns 503 while the store is unreachable; recovers on its own once it
/// comes back.
#[get("/ready")]
async fn readiness_check(pool: web::Data<Pool<Sqlite>>) -> impl Responder {
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(HealthResponse {
            status: "ready".to_string(),
            database: "connected".to_string(),
            queue: None,
            error: None,
        }),
        Err(e) => {
            error!("Readiness check failed: database unavailable: {:?}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "not_ready".to_string(),
                database: "disconnected".to_string(),
                queue: None,
                error: Some(format!("Database unavailable: {}", e)),
            })
        }
    }
}

/// Liveness check endpoint. Does not touch the store.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "alive".to_string(),
        database: "not_checked".to_string(),
        queue: None,
        error: None,
    })
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config
        .service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
