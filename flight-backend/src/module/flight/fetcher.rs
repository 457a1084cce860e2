//! Upstream page fetcher with fixed-delay retries

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, error, warn};

use crate::config::UpstreamConfig;

/// Cause of a single failed attempt
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

/// All attempts failed; carries the cause of the last one
#[derive(Debug, thiserror::Error)]
#[error("failed to fetch {url} after {attempts} attempts: {last}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    #[source]
    pub last: FetchFailure,
}

/// Source of raw page content.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Headers a desktop browser would send
pub fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(user_agent) {
        Ok(value) => {
            headers.insert(USER_AGENT, value);
        }
        Err(e) => warn!("Ignoring unusable User-Agent {:?}: {}", user_agent, e),
    }
    headers
}

/// reqwest-backed [`Fetcher`]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(request_timeout: Duration, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, retry })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.request_timeout(),
            RetryPolicy {
                max_attempts: config.max_attempts,
                delay: config.retry_delay(),
            },
        )
    }

    /// Single fetch attempt; any non-2xx status is a failure.
    async fn fetch_attempt(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchFailure> {
        let response = self.client.get(url).headers(headers.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_attempt(url, headers).await {
                Ok(body) => {
                    debug!(
                        "Fetched {} ({} bytes, attempt {}/{})",
                        url,
                        body.len(),
                        attempt,
                        max_attempts
                    );
                    return Ok(body);
                }
                Err(failure) if attempt < max_attempts => {
                    warn!(
                        "Attempt {}/{} failed for {}: {}. Retrying in {:?}",
                        attempt, max_attempts, url, failure, self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    error!("Failed to fetch {} after {} attempts: {}", url, max_attempts, failure);
                    return Err(FetchError {
                        url: url.to_string(),
                        attempts: max_attempts,
                        last: failure,
                    });
                }
            }
        }
    }
}
