pub mod job_worker;
pub mod queue;

pub use job_worker::{JobWorker, WorkerSettings};
pub use queue::JobNotifier;
