//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use super::ids::JobGroupId;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the recrawl core.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected before any job is created (HTTP 422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid principal credential (HTTP 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Token bucket exhausted; caller should retry later (HTTP 429).
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// Unknown job id (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Batch larger than the configured maximum (HTTP 413).
    #[error("too many urls: {count} > {max}")]
    TooManyUrls { count: usize, max: usize },

    /// Idempotency key already used; carries the group of the first submission (HTTP 409).
    #[error("duplicate idempotency key, original group {job_group_id}")]
    Conflict { job_group_id: JobGroupId },

    /// Illegal job state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Queue or pool shut down.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The external processor failed for one job.
    #[error("processing failed: {0}")]
    Processing(String),

    /// Internal errors (HTTP 500).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound HTTP errors (index backend, probe processor).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Error envelope code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::RateLimited { .. } => "rate_limited",
            Error::NotFound(_) => "not_found",
            Error::TooManyUrls { .. } => "too_many_urls",
            Error::Conflict { .. } => "conflict",
            Error::StateTransition(_)
            | Error::Cancelled(_)
            | Error::Processing(_)
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Http(_)
            | Error::Io(_) => "internal_error",
        }
    }

    /// HTTP status code for the error envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 422,
            Error::Unauthorized(_) => 401,
            Error::RateLimited { .. } => 429,
            Error::NotFound(_) => 404,
            Error::TooManyUrls { .. } => 413,
            Error::Conflict { .. } => 409,
            Error::Cancelled(_) => 503,
            _ => 500,
        }
    }

    /// Whether the message may be shown to clients verbatim.
    pub fn is_client_facing(&self) -> bool {
        self.status_code() < 500
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let cases = [
            (Error::validation("x"), "validation_error", 422),
            (Error::unauthorized("x"), "unauthorized", 401),
            (Error::RateLimited { retry_after_seconds: 3 }, "rate_limited", 429),
            (Error::not_found("x"), "not_found", 404),
            (Error::TooManyUrls { count: 101, max: 100 }, "too_many_urls", 413),
            (
                Error::Conflict { job_group_id: JobGroupId::must("g1") },
                "conflict",
                409,
            ),
            (Error::internal("x"), "internal_error", 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn test_internal_errors_are_not_client_facing() {
        assert!(!Error::internal("boom").is_client_facing());
        assert!(!Error::state_transition("x").is_client_facing());
        assert!(Error::not_found("x").is_client_facing());
    }
}
