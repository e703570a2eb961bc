//! Fetcher backed by a JSON profile lookup service.
//!
//! `GET {base_url}/profiles/{target}` answers with a [`ProfileData`] body,
//! `404` (or `{"exists": false}`) for unknown targets. An optional session
//! token read from disk is sent as a bearer credential.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use super::{FetchError, FetchOutcome, Fetcher, ProfileData};

/// HTTP client for the profile lookup service.
pub struct HttpProfileFetcher {
    client: reqwest::Client,
    base_url: Url,
    session_file: Option<PathBuf>,
    session_token: Option<String>,
    recent_items_limit: usize,
}

impl HttpProfileFetcher {
    /// * `base_url` - Service root, e.g. `http://host:9000`.
    /// * `session_file` - File holding a session token, loaded in `open`.
    /// * `timeout` - Per-request timeout applied by the client.
    pub fn new(
        base_url: &str,
        session_file: Option<PathBuf>,
        timeout: Duration,
        recent_items_limit: usize,
    ) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::Config(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Config(format!("invalid base url {base_url}")));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            session_file,
            session_token: None,
            recent_items_limit,
        })
    }

    fn profile_url(&self, target: &str) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in `new`
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("profiles").push(target);
        }
        url
    }
}

/// Map a lookup response onto an outcome.
fn interpret(status: StatusCode, body: &str, recent_items_limit: usize) -> Result<FetchOutcome, FetchError> {
    match status {
        StatusCode::NOT_FOUND => return Ok(FetchOutcome::NotFound),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(FetchError::Session(format!("session rejected ({status})")));
        }
        s if !s.is_success() => {
            return Err(FetchError::Api {
                status: s.as_u16(),
                body: body.to_string(),
            });
        }
        _ => {}
    }

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FetchError::Payload(e.to_string()))?;
    if value.get("exists") == Some(&serde_json::Value::Bool(false)) {
        return Ok(FetchOutcome::NotFound);
    }

    let mut data: ProfileData =
        serde_json::from_value(value).map_err(|e| FetchError::Payload(e.to_string()))?;
    data.trim_recent_items(recent_items_limit);
    data.into_outcome()
}

#[async_trait]
impl Fetcher for HttpProfileFetcher {
    async fn open(&mut self) -> Result<(), FetchError> {
        let Some(path) = &self.session_file else {
            return Ok(());
        };

        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let token = contents.trim();
                if !token.is_empty() {
                    self.session_token = Some(token.to_string());
                    info!("Loaded lookup session from {}", path.display());
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No session file at {}, continuing anonymously", path.display());
                Ok(())
            }
            Err(e) => Err(FetchError::Session(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn fetch(&mut self, target: &str) -> Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(self.profile_url(target));
        if let Some(token) = &self.session_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Lookup for {} answered {}", target, status);

        interpret(status, &body, self.recent_items_limit)
    }

    async fn close(&mut self) {
        if self.session_token.take().is_some() {
            debug!("Released lookup session");
        }
    }
}
