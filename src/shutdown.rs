use actix_web::dev::ServerHandle;
use sqlx::{Pool, Sqlite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Handles graceful shutdown of the application
///
/// On CTRL+C or SIGTERM:
/// 1. Stop the HTTP server (no new submissions)
/// 2. Signal the worker to stop claiming jobs
/// 3. Wait for the worker to finish the job in hand and close its fetcher
/// 4. Close the store pool
pub struct ShutdownCoordinator {
    server_handle: ServerHandle,
    server_task: JoinHandle<Result<(), std::io::Error>>,
    worker_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    pool: Pool<Sqlite>,
}

impl ShutdownCoordinator {
    pub fn new(
        server_handle: ServerHandle,
        server_task: JoinHandle<Result<(), std::io::Error>>,
        worker_handle: JoinHandle<()>,
        shutdown_tx: watch::Sender<bool>,
        pool: Pool<Sqlite>,
    ) -> Self {
        Self {
            server_handle,
            server_task,
            worker_handle,
            shutdown_tx,
            pool,
        }
    }

    /// Block until a shutdown signal arrives, then shut down in order
    pub async fn wait_for_shutdown(self) -> Result<(), std::io::Error> {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        #[cfg(unix)]
        let terminate = sigterm.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            received = ctrl_c => {
                received?;
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    async fn shutdown(self) -> Result<(), std::io::Error> {
        info!("Stopping HTTP server (no longer accepting new requests)...");
        self.server_handle.stop(true).await;

        info!("Signaling worker to stop claiming new jobs...");
        if let Err(e) = self.shutdown_tx.send(true) {
            // Receiver gone means the worker already exited.
            error!("Failed to send shutdown signal to worker: {:?}", e);
        }

        info!("Waiting for worker to finish its current job...");
        match self.worker_handle.await {
            Ok(()) => info!("Worker stopped"),
            Err(e) => error!("Worker task failed: {:?}", e),
        }

        match self.server_task.await {
            Ok(Ok(())) => info!("HTTP server shut down successfully"),
            Ok(Err(e)) => error!("HTTP server encountered error during shutdown: {:?}", e),
            Err(e) => error!("HTTP server task panicked: {:?}", e),
        }

        info!("Closing database connection pool...");
        self.pool.close().await;

        info!("Graceful shutdown completed");
        Ok(())
    }
}
