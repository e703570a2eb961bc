use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::db::models::JobId;

/// Receiving side of the submit -> worker channel.
pub type JobWakeups = mpsc::UnboundedReceiver<JobId>;

/// Sending side handed to request handlers.
///
/// Carries only the id of a freshly enqueued job; the store stays the
/// source of truth for what to run next.
#[derive(Clone, Debug)]
pub struct JobNotifier {
    tx: mpsc::UnboundedSender<JobId>,
}

impl JobNotifier {
    /// Wake the worker for a newly enqueued job
    pub fn notify(&self, job_id: JobId) {
        match self.tx.send(job_id) {
            Ok(()) => debug!("Notified worker of job {}", job_id),
            // Job is already durable; a restarted worker picks it up from the store.
            Err(_) => warn!("Worker is not listening; job {} stays queued", job_id),
        }
    }
}

/// Create a connected notifier / wake-up pair
pub fn channel() -> (JobNotifier, JobWakeups) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobNotifier { tx }, rx)
}
