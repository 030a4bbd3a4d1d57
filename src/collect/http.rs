use futures::StreamExt;
use std::time::Duration;

use super::FetchError;

/// Hard cap on any single source response
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

const USER_AGENT: &str = concat!("newsdesk/", env!("CARGO_PKG_VERSION"), " (tech news monitor)");

/// Backoff schedule for transient failures (429, 5xx, truncated bodies).
///
/// Attempt `n` (zero-based) waits `base_delay * 2^n` before retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Shared HTTP client for all source adapters.
///
/// Cheap to clone; the inner `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(FetchError::Network)?;
        Ok(Self {
            client,
            timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET `url` and return the body, retrying transient failures.
    ///
    /// - Each attempt (request plus body) is bounded by the configured timeout
    /// - 429 and 5xx back off and retry up to `max_retries` times
    /// - Other non-2xx statuses fail immediately
    /// - Bodies over [`MAX_RESPONSE_SIZE`] fail with `ResponseTooLarge`
    pub async fn get_bytes(
        &self,
        url: &str,
        headers: &[(&'static str, &str)],
    ) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;

        loop {
            let result = tokio::time::timeout(self.timeout, self.attempt(url, headers))
                .await
                .unwrap_or(Err(FetchError::Timeout));

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        retry = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient fetch failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(FetchError::HttpStatus(429)) => {
                    return Err(FetchError::RateLimited(self.retry.max_retries))
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &[(&'static str, &str)],
    ) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }
}

/// Stream a response body into memory, refusing anything over `limit` bytes
/// and flagging bodies shorter than their Content-Length.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
