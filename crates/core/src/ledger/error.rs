//! Ledger error types.

use rust_decimal::Decimal;
use tally_shared::types::{AccountId, JournalEntryId};
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while posting or voiding journal entries.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Entry must have at least 2 lines.
    #[error("Journal entry must have at least 2 lines")]
    InsufficientLines,

    /// Line has a negative amount.
    #[error("Line {line}: amounts cannot be negative")]
    NegativeAmount {
        /// 0-based line index.
        line: usize,
    },

    /// Line has both a debit and a credit.
    #[error("Line {line}: specify either a debit or a credit, not both")]
    BothSides {
        /// 0-based line index.
        line: usize,
    },

    /// Line has neither a debit nor a credit.
    #[error("Line {line}: a debit or a credit amount is required")]
    ZeroAmount {
        /// 0-based line index.
        line: usize,
    },

    /// Line amount has more decimals than the currency allows.
    #[error("Line {line}: amount has more than {minor_units} decimal places")]
    PrecisionExceeded {
        /// 0-based line index.
        line: usize,
        /// Allowed decimal places.
        minor_units: u32,
    },

    /// Line amount exceeds the storable range.
    #[error("Line {line}: amount is out of range")]
    AmountOutOfRange {
        /// 0-based line index.
        line: usize,
    },

    /// Entry total exceeds the storable range.
    #[error("Journal entry total is out of range")]
    TotalOutOfRange,

    /// Debits and credits differ.
    #[error("Journal entry is not balanced. Debit: {debit}, Credit: {credit}")]
    Unbalanced {
        /// Total debits.
        debit: Decimal,
        /// Total credits.
        credit: Decimal,
    },

    // ========== Account Errors ==========
    /// Account does not exist in the active company.
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),

    /// Posting would move the account balance out of the storable range.
    #[error("Account {0} balance would be out of range")]
    BalanceOutOfRange(AccountId),

    /// Account is inactive.
    #[error("Account {0} is inactive")]
    AccountInactive(AccountId),

    // ========== Entry State Errors ==========
    /// Entry was already voided.
    #[error("Journal entry {0} is already voided")]
    AlreadyVoided(JournalEntryId),

    /// Counter-entries cannot be voided themselves.
    #[error("Journal entry {0} is a void counter-entry and cannot be voided")]
    CannotVoidReversal(JournalEntryId),

    // ========== Storage ==========
    /// Persistence failure or ownership violation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Returns the error code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientLines => "INSUFFICIENT_LINES",
            Self::NegativeAmount { .. } => "NEGATIVE_AMOUNT",
            Self::BothSides { .. } => "BOTH_SIDES",
            Self::ZeroAmount { .. } => "ZERO_AMOUNT",
            Self::PrecisionExceeded { .. } => "PRECISION_EXCEEDED",
            Self::AmountOutOfRange { .. } | Self::TotalOutOfRange | Self::BalanceOutOfRange(_) => "OUT_OF_RANGE",
            Self::Unbalanced { .. } => "UNBALANCED",
            Self::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            Self::AccountInactive(_) => "ACCOUNT_INACTIVE",
            Self::AlreadyVoided(_) => "ALREADY_VOIDED",
            Self::CannotVoidReversal(_) => "CANNOT_VOID_REVERSAL",
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns the offending line field, for field-level validation detail.
    #[must_use]
    pub fn field(&self) -> Option<String> {
        match self {
            Self::NegativeAmount { line }
            | Self::BothSides { line }
            | Self::ZeroAmount { line }
            | Self::PrecisionExceeded { line, .. }
            | Self::AmountOutOfRange { line } => Some(format!("lines[{line}]")),
            Self::InsufficientLines | Self::TotalOutOfRange => Some("lines".to_string()),
            _ => None,
        }
    }
}
