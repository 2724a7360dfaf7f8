//! The governor: admission, circuit protection and retry for upstream calls.

use std::future::Future;
use std::time::Duration;

use scoreline_core::{Error, GovernorConfig, OpsEvent, OpsLevel, Result, SharedOps};
use serde::Serialize;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::breaker::{Admission, CircuitBreaker, CircuitState};
use crate::bucket::TokenBucket;
use crate::retry::RetryPolicy;

const COMPONENT: &str = "governor";

/// Raw outcome of a single upstream attempt.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Connection errors, timeouts and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Connect(_) | UpstreamError::Timeout(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            UpstreamError::Decode(_) => false,
        }
    }

    /// 4xx: the provider answered and refused. It is up, so this never
    /// counts against the circuit.
    pub fn is_rejection(&self) -> bool {
        matches!(self, UpstreamError::Status { status, .. } if (400..500).contains(status))
    }
}

/// Point-in-time view for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorSnapshot {
    pub tokens: f64,
    pub max_tokens: f64,
    pub waiting: usize,
    pub circuit: CircuitState,
    pub recent_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_remaining_secs: Option<u64>,
}

/// Rate limiter + circuit breaker + retry wrapper.
pub struct Governor {
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    ops: SharedOps,
}

impl Governor {
    pub fn new(config: &GovernorConfig, ops: SharedOps) -> Self {
        Self {
            bucket: TokenBucket::new(config.max_tokens, config.refill_per_sec),
            breaker: CircuitBreaker::from_config(config, ops.clone()),
            retry: RetryPolicy::from_config(config),
            ops,
        }
    }

    /// Assemble from parts (tests tune each piece independently).
    pub fn with_parts(
        bucket: TokenBucket,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        ops: SharedOps,
    ) -> Self {
        Self {
            bucket,
            breaker,
            retry,
            ops,
        }
    }

    /// Block until the rate budget allows one more upstream call.
    pub async fn acquire(&self, context: &str) {
        self.bucket.acquire(context).await;
    }

    /// Run `op` under circuit protection, rate limiting and bounded retry.
    ///
    /// Returns `Error::ProviderUnavailable` without invoking `op` while the
    /// circuit is open, `Error::ProviderRejected` for 4xx (no retry) and
    /// `Error::ProviderError` once retryable failures are exhausted.
    pub async fn execute<T, F, Fut>(&self, context: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, UpstreamError>>,
    {
        let Some(admission) = self.breaker.admit() else {
            debug!("Circuit open, skipping {}", context);
            return Err(Error::ProviderUnavailable);
        };

        let mut retries = 0u32;
        loop {
            self.bucket.acquire(context).await;
            let err = match op().await {
                Ok(value) => {
                    self.breaker.on_success(admission);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_rejection() {
                self.breaker.on_success(admission);
                self.ops.emit(
                    OpsEvent::new(COMPONENT, "request_rejected", OpsLevel::Warn)
                        .with("context", context)
                        .with("error", err.to_string()),
                );
                let status = match &err {
                    UpstreamError::Status { status, .. } => *status,
                    _ => 400,
                };
                return Err(Error::ProviderRejected {
                    status,
                    message: err.to_string(),
                });
            }

            // A probe gets exactly one attempt.
            if err.is_retryable()
                && admission == Admission::Normal
                && !self.retry.is_exhausted(retries)
            {
                let delay = self.retry.backoff_delay(retries);
                retries += 1;
                self.ops.emit(
                    OpsEvent::new(COMPONENT, "retry", OpsLevel::Info)
                        .with("context", context)
                        .with("attempt", retries)
                        .with("delay_ms", delay.as_millis() as u64)
                        .with("error", err.to_string()),
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            self.breaker.on_failure(admission);
            self.ops.emit(
                OpsEvent::new(COMPONENT, "request_failed", OpsLevel::Error)
                    .with("context", context)
                    .with("attempts", retries + 1)
                    .with("error", err.to_string()),
            );
            return Err(Error::ProviderError(err.to_string()));
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Whether `execute` would currently refuse without calling out.
    pub fn is_circuit_open(&self) -> bool {
        self.breaker.is_blocking()
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        GovernorSnapshot {
            tokens: self.bucket.available(),
            max_tokens: self.bucket.max_tokens(),
            waiting: self.bucket.waiting(),
            circuit: self.breaker.state(),
            recent_failures: self.breaker.recent_failures(),
            open_remaining_secs: self.breaker.open_remaining().map(|d: Duration| d.as_secs()),
        }
    }
}
