//! Wire-level error taxonomy shared by every crate.
//!
//! `ErrorKind` is the stable classification a caller sees; `ErrorBody` is the
//! structured failure payload (`{ code, message, field_errors? }`) returned by
//! the command dispatcher regardless of transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field name to list of messages, ordered for deterministic serialization.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Classification of every failure the command core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed or out-of-range parameters.
    ValidationError,
    /// Tenant, account, invoice, payment or allocation missing.
    NotFound,
    /// Cross-tenant access attempt.
    TenantMismatch,
    /// Journal entry debits and credits differ.
    Unbalanced,
    /// Journal line references an account outside the active tenant.
    UnknownAccount,
    /// Allocation exceeds invoice balance-due or payment remainder.
    InsufficientBalance,
    /// Idempotency key in flight or reused with different parameters.
    Conflict,
    /// Reversal of an already-reversed entity.
    AlreadyReversed,
    /// Unknown command name.
    CommandNotFound,
    /// Actor lacks the capability required by the command.
    Forbidden,
    /// Unexpected infrastructure failure.
    InternalError,
}

impl ErrorKind {
    /// Returns the HTTP-style status code for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::Forbidden => 403,
            Self::NotFound | Self::TenantMismatch | Self::CommandNotFound => 404,
            Self::Conflict | Self::AlreadyReversed => 409,
            Self::Unbalanced | Self::UnknownAccount | Self::InsufficientBalance => 422,
            Self::InternalError => 500,
        }
    }

    /// Returns the code exposed on the wire.
    ///
    /// `TenantMismatch` deliberately reports `NOT_FOUND` so that callers cannot
    /// probe for records owned by other tenants.
    #[must_use]
    pub const fn wire_code(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound | Self::TenantMismatch => "NOT_FOUND",
            Self::Unbalanced => "UNBALANCED",
            Self::UnknownAccount => "UNKNOWN_ACCOUNT",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::Conflict => "CONFLICT",
            Self::AlreadyReversed => "ALREADY_REVERSED",
            Self::CommandNotFound => "COMMAND_NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parses a wire code back into a kind.
    ///
    /// `NOT_FOUND` always yields `NotFound`; the mismatch distinction is not
    /// recoverable from the wire.
    #[must_use]
    pub fn from_wire_code(code: &str) -> Option<Self> {
        let kind = match code {
            "VALIDATION_ERROR" => Self::ValidationError,
            "NOT_FOUND" => Self::NotFound,
            "UNBALANCED" => Self::Unbalanced,
            "UNKNOWN_ACCOUNT" => Self::UnknownAccount,
            "INSUFFICIENT_BALANCE" => Self::InsufficientBalance,
            "CONFLICT" => Self::Conflict,
            "ALREADY_REVERSED" => Self::AlreadyReversed,
            "COMMAND_NOT_FOUND" => Self::CommandNotFound,
            "FORBIDDEN" => Self::Forbidden,
            "INTERNAL_ERROR" => Self::InternalError,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns true if the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::InternalError)
    }

    /// Returns true if the failure must be logged as a security event.
    #[must_use]
    pub const fn is_security_relevant(self) -> bool {
        matches!(self, Self::TenantMismatch)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ValidationError => "ValidationError",
            Self::NotFound => "NotFound",
            Self::TenantMismatch => "TenantMismatch",
            Self::Unbalanced => "Unbalanced",
            Self::UnknownAccount => "UnknownAccount",
            Self::InsufficientBalance => "InsufficientBalance",
            Self::Conflict => "Conflict",
            Self::AlreadyReversed => "AlreadyReversed",
            Self::CommandNotFound => "CommandNotFound",
            Self::Forbidden => "Forbidden",
            Self::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

/// Structured failure payload returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ErrorBody {
    /// Wire code (see [`ErrorKind::wire_code`]).
    pub code: String,
    /// Human readable, actionable message.
    pub message: String,
    /// Per-field validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
}

impl ErrorBody {
    /// Creates a body for the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.wire_code().to_string(),
            message: message.into(),
            field_errors: None,
        }
    }

    /// Attaches field-level validation messages.
    #[must_use]
    pub fn with_field_errors(mut self, field_errors: FieldErrors) -> Self {
        if !field_errors.is_empty() {
            self.field_errors = Some(field_errors);
        }
        self
    }
}
