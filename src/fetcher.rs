use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Upstream responded with HTTP {0}")]
    Status(u16),
    #[error("Response body exceeds {0} bytes")]
    TooLarge(u64),
    #[error("Unsupported URL: {0}")]
    InvalidUrl(String),
    #[error("Network error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Timeouts, transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Transport(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::TooLarge(_) | FetchError::InvalidUrl(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status(404) | FetchError::Status(410))
    }
}

/// Where source photos and watermark images are loaded from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches through `source`, retrying per `policy`. `timeout` bounds the
/// whole fetch: all attempts and backoff delays share it.
pub async fn fetch_with_retry(
    source: &dyn ImageSource,
    policy: &RetryPolicy,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let attempts = policy.run(|| source.fetch(url), FetchError::is_retryable);

    tokio::time::timeout(timeout, attempts)
        .await
        .unwrap_or(Err(FetchError::Timeout(timeout)))
}

/// Blocking `ureq` agent driven from the tokio blocking pool.
#[derive(Clone)]
pub struct HttpImageSource {
    agent: ureq::Agent,
    timeout: Duration,
    max_bytes: u64,
}

impl HttpImageSource {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(true)
            .user_agent("watermark-export/0.1")
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            timeout,
            max_bytes,
        }
    }

    fn map_error(&self, err: ureq::Error) -> FetchError {
        match err {
            ureq::Error::StatusCode(code) => FetchError::Status(code),
            ureq::Error::Timeout(_) => FetchError::Timeout(self.timeout),
            ureq::Error::BodyExceedsLimit(_) => FetchError::TooLarge(self.max_bytes),
            other => FetchError::Transport(other.to_string()),
        }
    }

    fn fetch_blocking(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self.agent.get(url).call().map_err(|e| self.map_error(e))?;

        response
            .body_mut()
            .with_config()
            .limit(self.max_bytes)
            .read_to_vec()
            .map_err(|e| self.map_error(e))
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        debug!("Fetching {}", url);
        let source = self.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || source.fetch_blocking(&url))
            .await
            .map_err(|e| FetchError::Transport(format!("Fetch task failed: {}", e)))?
    }
}
