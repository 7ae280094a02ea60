//! Idempotency error types.

use thiserror::Error;

/// Errors raised by the idempotency ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdempotencyError {
    /// The key is empty, too long, or contains non-printable characters.
    #[error("Idempotency key must be 1 to {max} printable ASCII characters")]
    InvalidKey {
        /// Maximum accepted length.
        max: usize,
    },

    /// Another execution holds the key.
    #[error("A request with this idempotency key is still in progress; retry later")]
    InProgress,

    /// The key was used before with different parameters.
    #[error("Idempotency key was already used with different parameters")]
    FingerprintMismatch,

    /// The stored result could not be decoded.
    #[error("Stored result for this idempotency key is unreadable: {0}")]
    CorruptResult(String),
}

impl IdempotencyError {
    /// Returns the error code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidKey { .. } => "INVALID_IDEMPOTENCY_KEY",
            Self::InProgress => "IDEMPOTENCY_IN_PROGRESS",
            Self::FingerprintMismatch => "IDEMPOTENCY_FINGERPRINT_MISMATCH",
            Self::CorruptResult(_) => "IDEMPOTENCY_CORRUPT_RESULT",
        }
    }
}
