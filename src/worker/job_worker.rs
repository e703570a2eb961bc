use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{Value, json};
use sqlx::{Pool, Sqlite};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::db::job_repository::{JobRepository, StoreError};
use crate::db::models::{Job, JobId, JobStatus};
use crate::fetcher::Fetcher;
use crate::worker::queue::JobWakeups;

/// Timing knobs for the worker loop
#[derive(Clone, Copy, Debug)]
pub struct WorkerSettings {
    /// Idle wait between store checks when nothing wakes the worker
    pub poll_interval: Duration,
    /// Back-off after the store fails
    pub store_retry: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            store_retry: Duration::from_secs(1),
        }
    }
}

/// Background worker processing jobs one at a time
pub struct JobWorker {
    pool: Pool<Sqlite>,
    fetcher: Box<dyn Fetcher>,
    wakeups: JobWakeups,
    settings: WorkerSettings,
}

impl JobWorker {
    /// Create a new JobWorker owning `fetcher` for its whole lifetime
    pub fn new(
        pool: Pool<Sqlite>,
        fetcher: Box<dyn Fetcher>,
        wakeups: JobWakeups,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            pool,
            fetcher,
            wakeups,
            settings,
        }
    }

    /// Run until `shutdown` flips to true
    ///
    /// # Architecture
    /// - Opens the fetcher session once
    /// - Drains the store with `claim_next`, oldest job first, one job at a time
    /// - When the queue is empty, waits for a submit notification, the poll
    ///   interval, or shutdown, whichever comes first
    /// - Store failures are logged and retried after `store_retry`
    /// - On shutdown the job in hand is finished before the fetcher is closed
    ///
    /// Only one lookup is ever in flight, so at most one job is `running`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Worker started (poll interval {:?}, store retry {:?})",
            self.settings.poll_interval, self.settings.store_retry
        );

        if let Err(e) = self.fetcher.open().await {
            warn!("Fetcher session unavailable, continuing without it: {}", e);
        }

        let mut wakeups_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match JobRepository::claim_next(&self.pool).await {
                Ok(Some(job)) => {
                    self.process(job, &mut shutdown).await;
                    continue;
                }
                Ok(None) => debug!("Worker found no queued jobs"),
                Err(e) => {
                    error!("Worker could not claim next job: {}", e);
                    if pause(&mut shutdown, self.settings.store_retry).await {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.wakeups.recv(), if wakeups_open => match received {
                    Some(job_id) => {
                        debug!("Worker woken by job {}", job_id);
                        // The claim loop picks up every queued job anyway.
                        while self.wakeups.try_recv().is_ok() {}
                    }
                    None => {
                        warn!("Submission channel closed, falling back to polling");
                        wakeups_open = false;
                    }
                },
                _ = sleep(self.settings.poll_interval) => {}
            }
        }

        self.fetcher.close().await;
        info!("Worker stopped");
    }

    /// Look up one claimed job and record its terminal state
    async fn process(&mut self, job: Job, shutdown: &mut watch::Receiver<bool>) {
        info!("Processing job {} (target={})", job.id, job.target);
        let started = Instant::now();

        let fetched = AssertUnwindSafe(self.fetcher.fetch(&job.target))
            .catch_unwind()
            .await;

        let (status, result) = match fetched {
            Ok(Ok(outcome)) => (JobStatus::Done, outcome.into_result()),
            Ok(Err(e)) => {
                warn!("Lookup for job {} failed: {}", job.id, e);
                (JobStatus::Error, error_payload(&e.to_string()))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Fetcher panicked on job {}: {}", job.id, message);
                (JobStatus::Error, error_payload(&message))
            }
        };

        persist(&self.pool, self.settings.store_retry, job.id, status, &result, shutdown).await;
        info!(
            "Finished job {}: status={} in {:?}",
            job.id,
            status,
            started.elapsed()
        );
    }
}

/// Write the terminal transition, retrying while the store is unavailable
///
/// Borrows only the pool so the worker future stays `Send` with a
/// fetcher that is not `Sync`.
async fn persist(
    pool: &Pool<Sqlite>,
    store_retry: Duration,
    job_id: JobId,
    status: JobStatus,
    result: &Value,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let written = match status {
            JobStatus::Done => JobRepository::complete(pool, job_id, result).await,
            _ => JobRepository::fail(pool, job_id, result).await,
        };

        match written {
            Ok(()) => return,
            Err(StoreError::Unavailable(e)) => {
                error!("Failed to record job {} result, retrying: {}", job_id, e);
                if pause(shutdown, store_retry).await {
                    warn!("Shutdown before job {} result was saved; it stays running", job_id);
                    return;
                }
            }
            Err(e) => {
                error!("Discarding result for job {}: {}", job_id, e);
                return;
            }
        }
    }
}

/// Sleep for `duration` unless shutdown arrives first. Returns true on shutdown.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = sleep(duration) => false,
    }
}

fn error_payload(message: &str) -> Value {
    json!({ "error": message })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("fetcher panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("fetcher panicked: {s}")
    } else {
        "fetcher panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Map;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::fetcher::{FetchError, FetchOutcome};
    use crate::worker::queue::{self, JobNotifier};

    #[derive(Clone)]
    enum Script {
        Found(Value),
        NotFound,
        Fail(u16, &'static str),
        Panic(&'static str),
    }

    /// Scripted fetcher that records each call with the running-job count seen during it.
    struct StubFetcher {
        pool: Pool<Sqlite>,
        script: HashMap<String, Script>,
        delay: Duration,
        calls: Arc<Mutex<Vec<(String, i64)>>>,
        opened: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn open(&mut self) -> Result<(), FetchError> {
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch(&mut self, target: &str) -> Result<FetchOutcome, FetchError> {
            let running = JobRepository::count_by_status(&self.pool, JobStatus::Running)
                .await
                .unwrap();
            self.calls.lock().unwrap().push((target.to_string(), running));
            sleep(self.delay).await;

            match self.script.get(target).cloned() {
                Some(Script::Found(Value::Object(fields))) => Ok(FetchOutcome::Found(fields)),
                Some(Script::Found(_)) => Ok(FetchOutcome::Found(Map::new())),
                Some(Script::NotFound) => Ok(FetchOutcome::NotFound),
                Some(Script::Fail(status, body)) => Err(FetchError::Api {
                    status,
                    body: body.to_string(),
                }),
                Some(Script::Panic(msg)) => panic!("{}", msg),
                None => Ok(FetchOutcome::Found(Map::new())),
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        pool: Pool<Sqlite>,
        notifier: JobNotifier,
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
        calls: Arc<Mutex<Vec<(String, i64)>>>,
        opened: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl Harness {
        async fn start(pool: Pool<Sqlite>, script: &[(&str, Script)], settings: WorkerSettings) -> Self {
            Self::start_with_delay(pool, script, settings, Duration::ZERO).await
        }

        async fn start_with_delay(
            pool: Pool<Sqlite>,
            script: &[(&str, Script)],
            settings: WorkerSettings,
            delay: Duration,
        ) -> Self {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let opened = Arc::new(AtomicBool::new(false));
            let closed = Arc::new(AtomicBool::new(false));
            let fetcher = StubFetcher {
                pool: pool.clone(),
                script: script
                    .iter()
                    .map(|(target, s)| (target.to_string(), s.clone()))
                    .collect(),
                delay,
                calls: calls.clone(),
                opened: opened.clone(),
                closed: closed.clone(),
            };

            let (notifier, wakeups) = queue::channel();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let worker = JobWorker::new(pool.clone(), Box::new(fetcher), wakeups, settings);
            let handle = tokio::spawn(worker.run(shutdown_rx));

            Self {
                pool,
                notifier,
                shutdown_tx,
                handle,
                calls,
                opened,
                closed,
            }
        }

        async fn submit(&self, target: &str) -> JobId {
            let job = JobRepository::enqueue(&self.pool, target).await.unwrap();
            self.notifier.notify(job.id);
            job.id
        }

        async fn wait_terminal(&self, job_id: JobId) -> Job {
            for _ in 0..500 {
                let job = JobRepository::get(&self.pool, job_id).await.unwrap().unwrap();
                if job.status.is_terminal() {
                    return job;
                }
                sleep(Duration::from_millis(10)).await;
            }
            panic!("job {job_id} never reached a terminal state");
        }

        async fn stop(self) -> (Arc<AtomicBool>, Arc<AtomicBool>) {
            self.shutdown_tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(5), self.handle)
                .await
                .expect("worker did not stop")
                .unwrap();
            (self.opened, self.closed)
        }
    }

    fn fast() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(20),
            store_retry: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn found_profile_is_stored_as_done() {
        let pool = memory_pool().await;
        let h = Harness::start(
            pool,
            &[("alice", Script::Found(json!({"followers": 100})))],
            fast(),
        )
        .await;

        let id = h.submit("alice").await;
        let job = h.wait_terminal(id).await;

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result, Some(json!({"exists": true, "followers": 100})));
        h.stop().await;
    }

    #[tokio::test]
    async fn missing_profile_is_done_with_exists_false() {
        let pool = memory_pool().await;
        let h = Harness::start(pool, &[("ghost_user_404", Script::NotFound)], fast()).await;

        let id = h.submit("ghost_user_404").await;
        let job = h.wait_terminal(id).await;

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result, Some(json!({"exists": false})));
        h.stop().await;
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded_and_next_job_still_runs() {
        let pool = memory_pool().await;
        let h = Harness::start(
            pool,
            &[
                ("x", Script::Fail(503, "network unreachable")),
                ("alice", Script::Found(json!({"followers": 100}))),
            ],
            fast(),
        )
        .await;

        let failing = h.submit("x").await;
        let next = h.submit("alice").await;

        let failed = h.wait_terminal(failing).await;
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(
            failed.result,
            Some(json!({"error": "profile service error (503): network unreachable"}))
        );

        let done = h.wait_terminal(next).await;
        assert_eq!(done.status, JobStatus::Done);
        h.stop().await;
    }

    #[tokio::test]
    async fn fetcher_panic_is_contained_to_its_job() {
        let pool = memory_pool().await;
        let h = Harness::start(pool, &[("boom", Script::Panic("lookup exploded"))], fast()).await;

        let exploding = h.submit("boom").await;
        let next = h.submit("bob").await;

        let failed = h.wait_terminal(exploding).await;
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(
            failed.result,
            Some(json!({"error": "fetcher panicked: lookup exploded"}))
        );
        assert_eq!(h.wait_terminal(next).await.status, JobStatus::Done);
        h.stop().await;
    }

    #[tokio::test]
    async fn jobs_run_in_creation_order_one_at_a_time() {
        let pool = memory_pool().await;
        let mut ids = Vec::new();
        for target in ["a", "b", "c", "d", "e"] {
            ids.push(JobRepository::enqueue(&pool, target).await.unwrap().id);
        }

        let h = Harness::start_with_delay(pool, &[], fast(), Duration::from_millis(5)).await;
        for id in &ids {
            h.wait_terminal(*id).await;
        }

        let calls = h.calls.lock().unwrap().clone();
        let order: Vec<&str> = calls.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(order, ["a", "b", "c", "d", "e"]);
        assert!(calls.iter().all(|(_, running)| *running == 1));
        h.stop().await;
    }

    #[tokio::test]
    async fn observed_statuses_never_regress() {
        let pool = memory_pool().await;
        let h = Harness::start_with_delay(pool, &[], fast(), Duration::from_millis(50)).await;
        let id = h.submit("slow").await;

        let mut observed = Vec::new();
        for _ in 0..500 {
            let job = JobRepository::get(&h.pool, id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                observed.push(job.status);
                break;
            }
            assert!(job.result.is_none(), "result visible before terminal state");
            observed.push(job.status);
            sleep(Duration::from_millis(2)).await;
        }

        let rank = |s: &JobStatus| match s {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Done | JobStatus::Error => 2,
        };
        assert!(observed.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])));
        assert_eq!(observed.last(), Some(&JobStatus::Done));
        h.stop().await;
    }

    #[tokio::test]
    async fn notification_wakes_an_idle_worker() {
        let pool = memory_pool().await;
        let settings = WorkerSettings {
            poll_interval: Duration::from_secs(3600),
            store_retry: Duration::from_millis(20),
        };
        let h = Harness::start(pool, &[], settings).await;
        // Let the worker settle into its idle wait.
        sleep(Duration::from_millis(50)).await;

        let id = h.submit("late").await;
        assert_eq!(h.wait_terminal(id).await.status, JobStatus::Done);
        h.stop().await;
    }

    #[tokio::test]
    async fn polling_picks_up_jobs_enqueued_elsewhere() {
        let pool = memory_pool().await;
        let h = Harness::start(pool, &[], fast()).await;

        // Enqueued without a notification, as another process would.
        let job = JobRepository::enqueue(&h.pool, "from-cli").await.unwrap();
        assert_eq!(h.wait_terminal(job.id).await.status, JobStatus::Done);
        h.stop().await;
    }

    #[tokio::test]
    async fn shutdown_opens_and_closes_the_fetcher_session() {
        let pool = memory_pool().await;
        let h = Harness::start(pool, &[], fast()).await;
        let id = h.submit("alice").await;
        h.wait_terminal(id).await;

        let (opened, closed) = h.stop().await;
        assert!(opened.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    /// Fetcher that is `Send` but not `Sync`.
    struct CountingFetcher {
        lookups: std::cell::Cell<u32>,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&mut self, _target: &str) -> Result<FetchOutcome, FetchError> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(FetchOutcome::NotFound)
        }
    }

    #[tokio::test]
    async fn worker_spawns_with_a_fetcher_that_is_not_sync() {
        let pool = memory_pool().await;
        let (notifier, wakeups) = queue::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fetcher = CountingFetcher {
            lookups: std::cell::Cell::new(0),
        };
        let worker = JobWorker::new(pool.clone(), Box::new(fetcher), wakeups, fast());
        let handle = tokio::spawn(worker.run(shutdown_rx));

        let job = JobRepository::enqueue(&pool, "alice").await.unwrap();
        notifier.notify(job.id);

        let mut status = JobStatus::Queued;
        for _ in 0..500 {
            status = JobRepository::get(&pool, job.id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Done);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn worker_survives_store_outage_and_still_stops() {
        let pool = memory_pool().await;
        pool.close().await;

        let settings = WorkerSettings {
            poll_interval: Duration::from_millis(10),
            store_retry: Duration::from_millis(10),
        };
        let h = Harness::start(pool, &[], settings).await;

        // Many retry periods with every claim failing.
        sleep(Duration::from_millis(200)).await;
        assert!(!h.handle.is_finished(), "worker exited on a store error");
        assert!(h.calls.lock().unwrap().is_empty());

        let (opened, closed) = h.stop().await;
        assert!(opened.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn persist_retries_until_shutdown_while_store_is_down() {
        let pool = memory_pool().await;
        pool.close().await;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(true).unwrap();
        });

        let started = Instant::now();
        tokio::time::timeout(
            Duration::from_secs(5),
            persist(
                &pool,
                Duration::from_millis(10),
                1,
                JobStatus::Done,
                &json!({"exists": false}),
                &mut shutdown_rx,
            ),
        )
        .await
        .expect("persist did not return after shutdown");

        assert!(started.elapsed() >= Duration::from_millis(90));
        stopper.await.unwrap();
    }

    #[test]
    fn panic_payloads_are_described() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(boxed.as_ref()), "fetcher panicked: bad state");

        let opaque: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(opaque.as_ref()), "fetcher panicked");
    }
}
