use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::{Pool, Sqlite};

use crate::db::job_repository::{JobRepository, StoreError};
use crate::db::models::{JobId, JobStatus};

/// Queue profile lookups and poll their results
#[derive(Parser, Debug)]
#[command(name = "profile-jobs", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the HTTP API and the background worker (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Queue a lookup; a running server's worker picks it up
    Submit { target: String },
    /// Print the current state of a job
    Status { id: JobId },
    /// Print job counts per status
    Stats,
}

/// Errors from one-shot commands
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("target must not be empty")]
    InvalidTarget,
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Run a one-shot command against the store and print its JSON output
pub async fn run(pool: &Pool<Sqlite>, command: &Command) -> Result<(), CliError> {
    let output = match command {
        Command::Serve | Command::Migrate => return Ok(()),
        Command::Submit { target } => {
            if target.trim().is_empty() {
                return Err(CliError::InvalidTarget);
            }
            let job = JobRepository::enqueue(pool, target).await?;
            json!({"id": job.id, "status": job.status})
        }
        Command::Status { id } => {
            let job = JobRepository::get(pool, *id)
                .await?
                .ok_or(CliError::NotFound(*id))?;
            json!({"id": job.id, "target": job.target, "status": job.status, "result": job.result})
        }
        Command::Stats => {
            let mut counts = serde_json::Map::new();
            for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Done, JobStatus::Error] {
                let count = JobRepository::count_by_status(pool, status).await?;
                counts.insert(status.to_string(), json!(count));
            }
            serde_json::Value::Object(counts)
        }
    };

    println!("{output}");
    Ok(())
}
