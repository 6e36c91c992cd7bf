use std::time::Duration;

use anyhow::Context;
use rand::random_range;
use reqwest::{StatusCode, Url, header::HeaderMap};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

/// Retry configuration owned by each adapter.
///
/// The fallback fetcher never retries; an adapter that wants to ride
/// out a 429 or a flaky gateway does it here.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

/// Thin JSON-over-HTTP client used by all REST adapters.
///
/// Responsibilities:
/// - Build query URLs against a base URL (overridable for tests)
/// - Decode JSON bodies
/// - Retry transient failures with exponential backoff + jitter
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

struct AttemptError {
    retriable: bool,
    source: anyhow::Error,
}

impl RestClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        Self::with_headers(base_url, retry, HeaderMap::new())
    }

    /// Like `new`, sending `headers` with every request (API keys).
    pub fn with_headers(base_url: &str, retry: RetryPolicy, headers: HeaderMap) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .default_headers(headers)
            .user_agent(concat!("kline-collector/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// GET `path` with query `params` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .with_context(|| format!("invalid request url for {path}"))?;

        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;

        loop {
            match self.get_once(url.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.retriable && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let jitter = random_range(0..=backoff.as_millis() as u64 / 4);
                    log::debug!(
                        "retrying {} (attempt {}) after error: {:#}",
                        path,
                        attempt,
                        e.source
                    );
                    sleep(backoff + Duration::from_millis(jitter)).await;
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                }
                Err(e) => return Err(e.source.context(format!("GET {path} failed"))),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, url: Url) -> Result<T, AttemptError> {
        let response = self.client.get(url).send().await.map_err(|e| AttemptError {
            retriable: e.is_timeout() || e.is_connect(),
            source: e.into(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                retriable: is_retriable_status(status),
                source: anyhow::anyhow!("HTTP {}: {}", status, body),
            });
        }

        response.json::<T>().await.map_err(|e| AttemptError {
            retriable: false,
            source: anyhow::Error::new(e).context("invalid JSON body"),
        })
    }
}

/// Rate limits (429, Binance's 418 ban) and server errors are
/// transient; everything else is a caller problem.
fn is_retriable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 || status.is_server_error()
}
