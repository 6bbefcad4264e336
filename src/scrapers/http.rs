//! Shared HTTP fetch path for both upstream hosts.
//!
//! Every request goes through the same classification:
//! 2xx body, 404 not-yet-published (no retry), 429 honors `Retry-After`,
//! 5xx and transport errors retry with exponential backoff, any other 4xx
//! is permanent. JSON decode failures are never retried.

use crate::cancel::CancelFlag;
use crate::ratelimit::{ApiBackoff, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const BODY_SAMPLE_LEN: usize = 300;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Classified fetch failure. `NotYetPublished` is not an error for the
/// pipeline: the ledger stays `pending` and the item is retried next run.
#[derive(Debug)]
pub enum FetchError {
    /// 404: the upstream has not published this resource yet.
    NotYetPublished,
    /// Non-retriable 4xx.
    Permanent { status: u16, body_sample: String },
    /// Body arrived but could not be decoded.
    Parse(String),
    /// Transient failures exhausted the retry budget.
    Exhausted { attempts: u32, last_error: String },
    /// The run was cancelled between attempts.
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotYetPublished => write!(f, "resource not yet published (404)"),
            FetchError::Permanent {
                status,
                body_sample,
            } => write!(f, "permanent failure {status}: {body_sample}"),
            FetchError::Parse(msg) => write!(f, "response parse error: {msg}"),
            FetchError::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            FetchError::Cancelled => write!(f, "fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Retry tuning shared by both host clients.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff for attempt k (1-based) is `base^k` seconds ±10% jitter.
    pub backoff_base: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff state configured so the delay after attempt k (1-based) is
    /// `base^k` seconds, jittered and clamped.
    fn backoff(&self) -> ApiBackoff {
        ApiBackoff::new(
            self.backoff_base,
            self.max_delay.as_secs_f64(),
            self.max_attempts,
        )
        .with_factor(self.backoff_base)
    }
}

/// One instance per upstream host: owns the connection pool, the host's
/// header set, and the shared rate limiter it paces on. Backoff state is
/// per endpoint class and resets on the first success, so an endpoint that
/// keeps failing across requests keeps its longer delays.
pub struct HostClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    backoff: ApiBackoff,
    policy: RetryPolicy,
    cancel: CancelFlag,
}

impl HostClient {
    pub fn new(
        headers: HeaderMap,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        cancel: CancelFlag,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            limiter,
            backoff: policy.backoff(),
            policy,
            cancel,
        })
    }

    /// Fetch `url`, pacing on `class`, and return the body text.
    pub async fn fetch_text(&self, url: &str, class: &str) -> Result<String, FetchError> {
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            self.limiter.wait(class).await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.backoff.reset(class);
                        return response.text().await.map_err(|e| {
                            FetchError::Parse(format!("body read failed: {e}"))
                        });
                    }
                    if status == StatusCode::NOT_FOUND {
                        debug!(url, "Not yet published (404)");
                        return Err(FetchError::NotYetPublished);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                        warn!(url, retry_after, attempt, "Rate limited (429), sleeping");
                        last_error = format!("429 rate limited, waited {retry_after}s");
                        sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }
                    if status.is_server_error() {
                        last_error = format!("server error {status}");
                        if attempt < self.policy.max_attempts {
                            let delay = self.backoff.next_delay(class);
                            warn!(
                                url,
                                status = status.as_u16(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Server error, backing off"
                            );
                            sleep(delay).await;
                        }
                        continue;
                    }
                    // Remaining 4xx: not worth retrying.
                    let body_sample = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(BODY_SAMPLE_LEN)
                        .collect();
                    return Err(FetchError::Permanent {
                        status: status.as_u16(),
                        body_sample,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.policy.max_attempts {
                        let delay = self.backoff.next_delay(class);
                        warn!(
                            url,
                            error = %e,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Transport error, backing off"
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// Fetch and decode a JSON body. Decode failures are parse errors, not
    /// retried.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        class: &str,
    ) -> Result<T, FetchError> {
        let body = self.fetch_text(url, class).await?;
        serde_json::from_str(&body).map_err(|e| {
            let sample: String = body.chars().take(BODY_SAMPLE_LEN).collect();
            FetchError::Parse(format!("{e}; body sample: {sample}"))
        })
    }
}
