//! Crate-wide error taxonomy.
//!
//! Component-local errors (config loading, queue access, provider calls, ...) wrap one of
//! these variants; anything that crosses a component boundary is surfaced as a `WorkerError`
//! so callers can classify it without downcasting into every leaf error type individually.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("duplicate analysis_type {0} declared by more than one config file")]
    ConfigDuplicateType(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("model provider error (transient): {0}")]
    ProviderTransient(String),

    #[error("model provider error (permanent): {0}")]
    ProviderPermanent(String),

    #[error("queue store unavailable: {0}")]
    QueueUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication/authorization error: {0}")]
    AuthError(String),

    #[error("client error: {0}")]
    ClientError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// The three-way retry bucket every retryable boundary classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    NonRetryable,
    Fatal,
}

impl WorkerError {
    #[must_use]
    pub fn retry_class(&self) -> RetryClass {
        match self {
            WorkerError::Timeout(_)
            | WorkerError::ProviderTransient(_)
            | WorkerError::QueueUnavailable(_)
            | WorkerError::ServerError(_) => RetryClass::Retryable,
            WorkerError::AuthError(_) => RetryClass::Fatal,
            WorkerError::ConfigInvalid(_)
            | WorkerError::ConfigDuplicateType(_)
            | WorkerError::ProviderPermanent(_)
            | WorkerError::NotFound(_)
            | WorkerError::ClientError(_)
            | WorkerError::StateConflict(_)
            | WorkerError::Cancelled => RetryClass::NonRetryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_is_retryable() {
        assert_eq!(
            WorkerError::ServerError("502".into()).retry_class(),
            RetryClass::Retryable
        );
    }

    #[test]
    fn auth_error_is_fatal() {
        assert_eq!(
            WorkerError::AuthError("bad token".into()).retry_class(),
            RetryClass::Fatal
        );
    }

    #[test]
    fn not_found_is_non_retryable() {
        assert_eq!(
            WorkerError::NotFound("task".into()).retry_class(),
            RetryClass::NonRetryable
        );
    }
}
