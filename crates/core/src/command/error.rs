//! Command failures and their wire rendering.

use tally_shared::{ErrorBody, ErrorKind, FieldErrors};
use thiserror::Error;
use validator::{ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::billing::{AllocationError, DocumentError};
use crate::idempotency::IdempotencyError;
use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::tenant::TenantError;

/// Message returned for every tenant mismatch.
const NOT_FOUND_MESSAGE: &str = "The requested resource was not found";

/// Message returned for every internal failure.
const INTERNAL_MESSAGE: &str = "An internal error occurred; the operation was not applied";

/// Any failure of a dispatched command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No handler is registered under the name.
    #[error("Unknown command: {0}")]
    CommandNotFound(String),

    /// Parameters failed to parse or validate.
    #[error("{message}")]
    Validation {
        /// Summary message.
        message: String,
        /// Per-field messages.
        fields: FieldErrors,
    },

    /// The actor may not run the command in this company.
    #[error("{0}")]
    Forbidden(String),

    /// Tenant resolution or ownership failure.
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Idempotency ledger refusal.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    /// Journal posting or voiding failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Invoice or payment creation failure.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Allocation engine failure.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A failure replayed from the idempotency ledger.
    #[error("{body}")]
    Stored {
        /// Kind recovered from the stored wire code.
        kind: ErrorKind,
        /// The stored body, returned unchanged.
        body: ErrorBody,
    },

    /// Unexpected failure inside the core.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// Builds a validation error for a single field.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), vec![message.clone()]);
        Self::Validation { message, fields }
    }

    /// Wraps a parameter deserialization failure.
    #[must_use]
    pub fn malformed(error: &serde_json::Error) -> Self {
        Self::Validation {
            message: format!("Invalid parameters: {error}"),
            fields: FieldErrors::new(),
        }
    }

    /// Wraps a failure replayed from the idempotency ledger.
    #[must_use]
    pub fn stored(body: ErrorBody) -> Self {
        let kind = ErrorKind::from_wire_code(&body.code).unwrap_or(ErrorKind::InternalError);
        Self::Stored { kind, body }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandNotFound(_) => ErrorKind::CommandNotFound,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Tenant(e) => tenant_kind(e),
            Self::Idempotency(e) => match e {
                IdempotencyError::InvalidKey { .. } => ErrorKind::ValidationError,
                IdempotencyError::InProgress | IdempotencyError::FingerprintMismatch => ErrorKind::Conflict,
                IdempotencyError::CorruptResult(_) => ErrorKind::InternalError,
            },
            Self::Ledger(e) => match e {
                LedgerError::Unbalanced { .. } => ErrorKind::Unbalanced,
                LedgerError::UnknownAccount(_) => ErrorKind::UnknownAccount,
                LedgerError::AlreadyVoided(_) => ErrorKind::AlreadyReversed,
                LedgerError::Store(e) => store_kind(e),
                _ => ErrorKind::ValidationError,
            },
            Self::Document(e) => match e {
                DocumentError::Store(e) => store_kind(e),
                _ => ErrorKind::ValidationError,
            },
            Self::Allocation(e) => match e {
                AllocationError::ExceedsBalanceDue { .. } | AllocationError::ExceedsUnallocated { .. } => {
                    ErrorKind::InsufficientBalance
                }
                AllocationError::PaymentReversed(_) | AllocationError::AllocationReversed(_) => {
                    ErrorKind::AlreadyReversed
                }
                AllocationError::InvariantViolated(_) => ErrorKind::InternalError,
                AllocationError::Store(e) => store_kind(e),
                _ => ErrorKind::ValidationError,
            },
            Self::Store(e) => store_kind(e),
            Self::Stored { kind, .. } => *kind,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// The parameter a validation failure refers to, if any.
    fn field(&self) -> Option<String> {
        match self {
            Self::Idempotency(IdempotencyError::InvalidKey { .. }) => Some("idempotency_key".to_string()),
            Self::Ledger(e) => e.field(),
            Self::Document(e) => e.field(),
            Self::Allocation(e) => e.field(),
            Self::Store(StoreError::Duplicate { entity: "invoice", .. }) => Some("number".to_string()),
            _ => None,
        }
    }

    /// Renders the caller-facing body.
    ///
    /// Tenant mismatches and internal failures carry fixed messages.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        let kind = self.kind();
        match (kind, self) {
            (_, Self::Stored { body, .. }) => body.clone(),
            (ErrorKind::TenantMismatch, _) => ErrorBody::new(kind, NOT_FOUND_MESSAGE),
            (ErrorKind::InternalError, _) => ErrorBody::new(kind, INTERNAL_MESSAGE),
            (_, Self::Validation { message, fields }) => {
                ErrorBody::new(kind, message.clone()).with_field_errors(fields.clone())
            }
            _ => {
                let message = self.to_string();
                let mut fields = FieldErrors::new();
                if let Some(field) = self.field() {
                    fields.insert(field, vec![message.clone()]);
                }
                ErrorBody::new(kind, message).with_field_errors(fields)
            }
        }
    }
}

fn tenant_kind(error: &TenantError) -> ErrorKind {
    match error {
        TenantError::Mismatch { .. } => ErrorKind::TenantMismatch,
        TenantError::NotFound(_) | TenantError::Inactive(_) => ErrorKind::NotFound,
    }
}

fn store_kind(error: &StoreError) -> ErrorKind {
    match error {
        StoreError::NotFound { .. } => ErrorKind::NotFound,
        StoreError::Tenant(e) => tenant_kind(e),
        StoreError::Duplicate { .. } => ErrorKind::ValidationError,
        StoreError::LeaseLost { .. } => ErrorKind::Conflict,
        StoreError::Database(_) => ErrorKind::InternalError,
    }
}

impl From<ValidationErrors> for CommandError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        flatten("", &errors, &mut fields);
        Self::Validation {
            message: "Invalid parameters".to_string(),
            fields,
        }
    }
}

/// Flattens nested validator output into `lines[0].quantity` style paths.
fn flatten(prefix: &str, errors: &ValidationErrors, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                out.entry(path).or_default().extend(list.iter().map(describe));
            }
            ValidationErrorsKind::Struct(inner) => flatten(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten(&format!("{path}[{index}]"), inner, out);
                }
            }
        }
    }
}

fn describe(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map_or_else(|| format!("failed '{}' check", error.code), ToString::to_string)
}
