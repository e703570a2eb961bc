//! Profile lookup boundary.
//!
//! The worker owns exactly one [`Fetcher`] for the process lifetime and is
//! the only caller. Implementations carry whatever session state the remote
//! side needs; it is acquired in [`Fetcher::open`] and released in
//! [`Fetcher::close`].

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use http::HttpProfileFetcher;

/// Default number of recent items kept per profile.
pub const MAX_RECENT_ITEMS: usize = 5;

/// Errors raised while looking up a target
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("profile request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The lookup service answered with a non-2xx status.
    #[error("profile service error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Session state could not be loaded or was rejected.
    #[error("session error: {0}")]
    Session(String),

    /// The fetcher was configured with unusable settings.
    #[error("invalid fetcher configuration: {0}")]
    Config(String),

    /// The response could not be turned into a profile record.
    #[error("invalid profile payload: {0}")]
    Payload(String),
}

/// What a lookup found for one target
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Profile fields, stored as-is next to `exists: true`.
    Found(Map<String, Value>),
    NotFound,
}

impl FetchOutcome {
    /// Structured value persisted as the job result.
    pub fn into_result(self) -> Value {
        match self {
            FetchOutcome::Found(mut fields) => {
                fields.insert("exists".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            FetchOutcome::NotFound => serde_json::json!({ "exists": false }),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send {
    /// Acquire session state before the first lookup.
    async fn open(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Look up one target. May be slow; never retried by the caller.
    async fn fetch(&mut self, target: &str) -> Result<FetchOutcome, FetchError>;

    /// Release session state once the worker stops.
    async fn close(&mut self) {}
}

/// One entry of a profile's recent activity
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecentItem {
    pub date: String,
    pub caption: Option<String>,
}

/// Profile record returned by the lookup service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProfileData {
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub media_count: u64,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub followees: u64,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_items: Vec<RecentItem>,
}

impl ProfileData {
    /// Keep at most `limit` recent items, and none for private or empty profiles.
    pub fn trim_recent_items(&mut self, limit: usize) {
        if self.is_private || self.media_count == 0 {
            self.recent_items.clear();
        } else {
            self.recent_items.truncate(limit);
        }
    }

    pub fn into_outcome(self) -> Result<FetchOutcome, FetchError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => Ok(FetchOutcome::Found(fields)),
            Ok(other) => Err(FetchError::Payload(format!("expected an object, got {other}"))),
            Err(e) => Err(FetchError::Payload(e.to_string())),
        }
    }
}
