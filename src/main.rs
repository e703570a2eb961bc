use std::io;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use sqlx::{Pool, Sqlite};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod db;
mod fetcher;
mod shutdown;
mod worker;

use crate::api::{health::health_config, job::JobService, job::handlers::job_config, validation};
use crate::cli::{Cli, Command};
use crate::db::job_repository::JobRepository;
use crate::fetcher::HttpProfileFetcher;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::JobWorker;

/// Console output plus daily rotating files per level:
/// logs/info.log.2024-12-22, logs/error.log.2024-12-22, ...
fn init_logging(log_dir: &str) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(tracing_appender::rolling::daily(log_dir, "info.log"))
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(tracing_appender::rolling::daily(log_dir, "warn.log"))
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(tracing_appender::rolling::daily(log_dir, "error.log"))
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(tracing_appender::rolling::daily(log_dir, "debug.log"))
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .with(debug_layer)
        .init();
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    let config = config::Config::from_env().map_err(io::Error::other)?;

    std::fs::create_dir_all(&config.log_dir)?;
    init_logging(&config.log_dir);

    let pool = db::connection::get_connection(&config.database_url, config.max_db_connections)
        .await
        .map_err(io::Error::other)?;
    info!("Database connection pool established");

    db::migrations::run_migrations(&pool)
        .await
        .map_err(io::Error::other)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::Migrate => {
            pool.close().await;
            Ok(())
        }
        command => {
            let outcome = cli::run(&pool, &command).await;
            pool.close().await;
            outcome.map_err(io::Error::other)
        }
    }
}

/// Run the HTTP API and the single background worker until a shutdown signal
async fn serve(config: config::Config, pool: Pool<Sqlite>) -> io::Result<()> {
    info!("Starting profile-jobs");
    info!("Configuration loaded successfully:");
    info!("  - Max payload size: {} bytes", config.max_payload_size);
    info!("  - Max database connections: {}", config.max_db_connections);
    info!("  - Poll interval: {:?}", config.poll_interval);
    info!("  - Lookup service: {}", config.fetcher_base_url);

    if config.recover_interrupted_jobs {
        JobRepository::fail_interrupted(&pool)
            .await
            .map_err(io::Error::other)?;
    }

    let fetcher = HttpProfileFetcher::new(
        &config.fetcher_base_url,
        Some(config.fetcher_session_file.clone()),
        config.fetcher_timeout,
        config.recent_items_limit,
    )
    .map_err(io::Error::other)?;

    let (notifier, wakeups) = worker::queue::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let job_worker = JobWorker::new(pool.clone(), Box::new(fetcher), wakeups, config.worker_settings());
    let worker_handle = tokio::spawn(job_worker.run(shutdown_rx));
    info!("Spawned job worker");

    let server_pool = pool.clone();
    let max_payload_size = config.max_payload_size;

    let server = HttpServer::new(move || {
        let job_service = web::Data::new(JobService::new(server_pool.clone(), notifier.clone()));

        App::new()
            .app_data(web::Data::new(server_pool.clone()))
            .app_data(job_service)
            .app_data(web::PayloadConfig::default().limit(max_payload_size))
            .app_data(validation::json_config(max_payload_size))
            .configure(health_config)
            .configure(job_config)
    });

    info!("Server starting on http://{}:{}", config.bind_addr, config.port);

    let server = server
        .bind((config.bind_addr.as_str(), config.port))?
        .run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    ShutdownCoordinator::new(server_handle, server_task, worker_handle, shutdown_tx, pool)
        .wait_for_shutdown()
        .await
}
