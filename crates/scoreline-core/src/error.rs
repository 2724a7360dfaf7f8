//! Error types for Scoreline.
//!
//! Only exceptional paths live here. Write outcomes (lock contention, stale
//! or immutable rejections) are typed `UpdateOutcome` values instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Circuit breaker is open. A controlled skip, not an alarm.
    #[error("Provider unavailable: circuit open")]
    ProviderUnavailable,

    /// Timeout, connection failure or 5xx after retries were exhausted.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// 4xx from the provider. Never retried.
    #[error("Provider rejected request: status={status}: {message}")]
    ProviderRejected { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the "circuit open" signal, which callers treat as a skip.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::ProviderUnavailable)
    }

    /// Whether the work that produced this error is worth another attempt
    /// on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable | Error::ProviderError(_) | Error::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
