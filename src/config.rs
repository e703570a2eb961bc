use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::MAX_RECENT_ITEMS;
use crate::worker::WorkerSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Job store location
    /// Format: sqlite://PATH/TO/FILE.db?mode=rwc
    pub database_url: String,

    /// HTTP listener address and port
    pub bind_addr: String,
    pub port: u16,

    /// Maximum payload size for all requests (in bytes)
    pub max_payload_size: usize,

    /// Maximum number of pooled store connections
    pub max_db_connections: u32,

    /// Worker idle poll interval and back-off after store errors
    pub poll_interval: Duration,
    pub store_retry: Duration,

    /// Directory for rolling log files
    pub log_dir: String,

    /// Profile lookup service root URL
    pub fetcher_base_url: String,

    /// File holding the lookup session token
    pub fetcher_session_file: PathBuf,

    /// Per-request timeout for lookups
    pub fetcher_timeout: Duration,

    /// Recent items kept per profile
    pub recent_items_limit: usize,

    /// Fail jobs left `running` by a previous process at start-up
    pub recover_interrupted_jobs: bool,
}

/// Parse an optional variable, falling back to `default` when unset or unparseable
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// All variables are optional:
    /// - DATABASE_URL: SQLite connection string (default: sqlite://profile-jobs.db?mode=rwc)
    /// - BIND_ADDR / PORT: HTTP listener (default: 127.0.0.1 / 8080)
    /// - MAX_PAYLOAD_SIZE: Maximum request payload size in bytes (default: 65536)
    /// - MAX_DB_CONNECTIONS: Pool size (default: 5)
    /// - POLL_INTERVAL_SECS: Worker idle poll interval (default: 2)
    /// - STORE_RETRY_SECS: Worker back-off after store errors (default: 1)
    /// - LOG_DIR: Log directory (default: logs)
    /// - FETCHER_BASE_URL: Profile lookup service (default: http://127.0.0.1:9000)
    /// - FETCHER_SESSION_FILE: Session token file (default: .profile-session)
    /// - FETCHER_TIMEOUT_SECS: Lookup timeout (default: 30)
    /// - RECENT_ITEMS_LIMIT: Recent items kept per profile (default: 5)
    /// - RECOVER_INTERRUPTED_JOBS: true/false (default: true)
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://profile-jobs.db?mode=rwc".to_string());

        let recover_interrupted_jobs = match env::var("RECOVER_INTERRUPTED_JOBS") {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| {
                format!("RECOVER_INTERRUPTED_JOBS must be true or false, got {raw:?}")
            })?,
            Err(_) => true,
        };

        let max_db_connections = parse_or("MAX_DB_CONNECTIONS", 5u32);
        if max_db_connections == 0 {
            return Err("MAX_DB_CONNECTIONS must be at least 1".to_string());
        }

        Ok(Config {
            database_url,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_or("PORT", 8080),
            max_payload_size: parse_or("MAX_PAYLOAD_SIZE", 64 * 1024),
            max_db_connections,
            poll_interval: Duration::from_secs(parse_or("POLL_INTERVAL_SECS", 2)),
            store_retry: Duration::from_secs(parse_or("STORE_RETRY_SECS", 1)),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            fetcher_base_url: env::var("FETCHER_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            fetcher_session_file: env::var("FETCHER_SESSION_FILE")
                .unwrap_or_else(|_| ".profile-session".to_string())
                .into(),
            fetcher_timeout: Duration::from_secs(parse_or("FETCHER_TIMEOUT_SECS", 30)),
            recent_items_limit: parse_or("RECENT_ITEMS_LIMIT", MAX_RECENT_ITEMS),
            recover_interrupted_jobs,
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: self.poll_interval,
            store_retry: self.store_retry,
        }
    }
}
