//! Bounded retry with exponential backoff for outbound calls.

use std::future::Future;
use std::time::Duration;

/// Failure of one outbound call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The remote side never acted on the request: the connection could not
    /// be opened, or it answered 429.
    Unprocessed(String),
    /// Timeouts and 5xx responses. The request may have taken effect.
    Transient(String),
    /// Anything retrying won't fix, e.g. a 4xx or an undecodable body.
    Permanent(String),
}

impl CallError {
    pub fn message(&self) -> &str {
        match self {
            CallError::Unprocessed(m) | CallError::Transient(m) | CallError::Permanent(m) => m,
        }
    }

    /// Classifies a reqwest error.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status(status, "");
        }
        if error.is_connect() {
            CallError::Unprocessed(error.to_string())
        } else if error.is_timeout() || error.is_request() {
            CallError::Transient(error.to_string())
        } else {
            CallError::Permanent(error.to_string())
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            CallError::Unprocessed(message)
        } else if status.is_server_error() {
            CallError::Transient(message)
        } else {
            CallError::Permanent(message)
        }
    }

    /// Reclassifies for a request that must not be repeated once it may have
    /// reached the remote side (placing an order, sending an email). Only
    /// `Unprocessed` stays retryable.
    pub fn for_non_idempotent(self) -> Self {
        match self {
            CallError::Transient(m) => CallError::Permanent(m),
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Unprocessed(_) | CallError::Transient(_))
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Retry policy: `max_attempts` tries in total, doubling the delay each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails permanently or the attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    metrics::counter!(
                        "outbound_retries_total",
                        "operation" => operation.to_string()
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
