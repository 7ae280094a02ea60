//! Billing error types.

use rust_decimal::Decimal;
use tally_shared::types::{AllocationId, CustomerId, InvoiceId, PaymentId};
use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while creating invoices and payments.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Invoice has no lines.
    #[error("Invoice must have at least one line")]
    NoLines,

    /// Line quantity is zero or negative.
    #[error("Line {line}: quantity must be positive")]
    NonPositiveQuantity {
        /// 0-based line index.
        line: usize,
    },

    /// Line unit price is negative.
    #[error("Line {line}: unit price cannot be negative")]
    NegativeUnitPrice {
        /// 0-based line index.
        line: usize,
    },

    /// Line quantity has more than four decimals or sixteen integer digits.
    #[error("Line {line}: quantity must fit 16 integer digits and 4 decimal places")]
    QuantityOutOfRange {
        /// 0-based line index.
        line: usize,
    },

    /// Line unit price has more than four decimals or sixteen integer digits.
    #[error("Line {line}: unit price must fit 16 integer digits and 4 decimal places")]
    UnitPriceOutOfRange {
        /// 0-based line index.
        line: usize,
    },

    /// Line amount `quantity * unit_price` is too large to store.
    #[error("Line {line}: amount is out of range")]
    LineAmountOutOfRange {
        /// 0-based line index.
        line: usize,
    },

    /// Invoice total is too large to store.
    #[error("Total is out of range")]
    TotalOutOfRange,

    /// Document total is zero or negative.
    #[error("Total must be positive")]
    NonPositiveTotal,

    /// Payment amount has more decimals than the currency allows.
    #[error("Amount has more than {minor_units} decimal places")]
    PrecisionExceeded {
        /// Allowed decimal places.
        minor_units: u32,
    },

    /// Payment amount is too large to store.
    #[error("Amount is out of range")]
    AmountOutOfRange,

    /// Due date precedes issue date.
    #[error("Due date cannot be before the issue date")]
    DueBeforeIssue,

    /// Customer is deactivated.
    #[error("Customer {0} is inactive")]
    CustomerInactive(CustomerId),

    /// Persistence failure or ownership violation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DocumentError {
    /// Returns the error code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoLines => "NO_LINES",
            Self::NonPositiveQuantity { .. } => "NON_POSITIVE_QUANTITY",
            Self::NegativeUnitPrice { .. } => "NEGATIVE_UNIT_PRICE",
            Self::QuantityOutOfRange { .. }
            | Self::UnitPriceOutOfRange { .. }
            | Self::LineAmountOutOfRange { .. }
            | Self::TotalOutOfRange
            | Self::AmountOutOfRange => "OUT_OF_RANGE",
            Self::NonPositiveTotal => "NON_POSITIVE_TOTAL",
            Self::PrecisionExceeded { .. } => "PRECISION_EXCEEDED",
            Self::DueBeforeIssue => "DUE_BEFORE_ISSUE",
            Self::CustomerInactive(_) => "CUSTOMER_INACTIVE",
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns the parameter the error refers to.
    #[must_use]
    pub fn field(&self) -> Option<String> {
        match self {
            Self::NoLines | Self::NonPositiveTotal | Self::TotalOutOfRange => Some("lines".to_string()),
            Self::NonPositiveQuantity { line } | Self::QuantityOutOfRange { line } => {
                Some(format!("lines[{line}].quantity"))
            }
            Self::NegativeUnitPrice { line } | Self::UnitPriceOutOfRange { line } => {
                Some(format!("lines[{line}].unit_price"))
            }
            Self::LineAmountOutOfRange { line } => Some(format!("lines[{line}]")),
            Self::PrecisionExceeded { .. } | Self::AmountOutOfRange => Some("amount".to_string()),
            Self::DueBeforeIssue => Some("due_date".to_string()),
            Self::CustomerInactive(_) => Some("customer_id".to_string()),
            Self::Store(_) => None,
        }
    }
}

/// Errors raised by the payment allocation engine.
#[derive(Debug, Error)]
pub enum AllocationError {
    // ========== Validation Errors ==========
    /// No allocation pairs were supplied.
    #[error("At least one allocation is required")]
    EmptyBatch,

    /// Requested amount is zero or negative.
    #[error("Allocation {index}: amount must be positive")]
    NonPositiveAmount {
        /// 0-based pair index.
        index: usize,
    },

    /// Requested amount has more decimals than the currency allows.
    #[error("Allocation {index}: amount has more than {minor_units} decimal places")]
    PrecisionExceeded {
        /// 0-based pair index.
        index: usize,
        /// Allowed decimal places.
        minor_units: u32,
    },

    /// Requested amount is too large to store.
    #[error("Allocation {index}: amount is out of range")]
    AmountOutOfRange {
        /// 0-based pair index.
        index: usize,
    },

    /// Invoice belongs to a different customer than the payment.
    #[error("Invoice {invoice_id} does not belong to the payment's customer")]
    CustomerMismatch {
        /// The invoice.
        invoice_id: InvoiceId,
    },

    // ========== Balance Errors ==========
    /// Cumulative amount for an invoice exceeds its balance due.
    #[error("Allocating {requested} to invoice {invoice_id} exceeds its balance due of {balance_due}")]
    ExceedsBalanceDue {
        /// The invoice.
        invoice_id: InvoiceId,
        /// Cumulative requested amount.
        requested: Decimal,
        /// Balance due before this batch.
        balance_due: Decimal,
    },

    /// Cumulative amount exceeds the payment's unallocated remainder.
    #[error("Allocating {requested} exceeds the payment's unallocated remainder of {unallocated}")]
    ExceedsUnallocated {
        /// Cumulative requested amount.
        requested: Decimal,
        /// Remainder before this batch.
        unallocated: Decimal,
    },

    /// Stored amounts would leave their valid range.
    #[error("Balance invariant violated: {0}")]
    InvariantViolated(String),

    // ========== State Errors ==========
    /// Payment has been reversed.
    #[error("Payment {0} is already reversed")]
    PaymentReversed(PaymentId),

    /// Allocation has been reversed.
    #[error("Allocation {0} is already reversed")]
    AllocationReversed(AllocationId),

    // ========== Storage ==========
    /// Persistence failure or ownership violation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AllocationError {
    /// Returns the error code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyBatch => "EMPTY_BATCH",
            Self::NonPositiveAmount { .. } => "NON_POSITIVE_AMOUNT",
            Self::PrecisionExceeded { .. } => "PRECISION_EXCEEDED",
            Self::AmountOutOfRange { .. } => "OUT_OF_RANGE",
            Self::CustomerMismatch { .. } => "CUSTOMER_MISMATCH",
            Self::ExceedsBalanceDue { .. } => "EXCEEDS_BALANCE_DUE",
            Self::ExceedsUnallocated { .. } => "EXCEEDS_UNALLOCATED",
            Self::InvariantViolated(_) => "INVARIANT_VIOLATED",
            Self::PaymentReversed(_) => "PAYMENT_REVERSED",
            Self::AllocationReversed(_) => "ALLOCATION_REVERSED",
            Self::Store(e) => e.error_code(),
        }
    }

    /// Returns the parameter the error refers to.
    #[must_use]
    pub fn field(&self) -> Option<String> {
        match self {
            Self::EmptyBatch => Some("allocations".to_string()),
            Self::NonPositiveAmount { index }
            | Self::PrecisionExceeded { index, .. }
            | Self::AmountOutOfRange { index } => {
                Some(format!("allocations[{index}].amount"))
            }
            Self::CustomerMismatch { .. } => Some("allocations".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_allocation_error_display() {
        let err = AllocationError::ExceedsUnallocated {
            requested: dec!(70.00),
            unallocated: dec!(60.00),
        };
        assert_eq!(
            err.to_string(),
            "Allocating 70.00 exceeds the payment's unallocated remainder of 60.00"
        );
        assert_eq!(err.error_code(), "EXCEEDS_UNALLOCATED");
    }

    #[test]
    fn test_fields() {
        assert_eq!(
            AllocationError::NonPositiveAmount { index: 1 }.field().as_deref(),
            Some("allocations[1].amount")
        );
        assert_eq!(
            DocumentError::NegativeUnitPrice { line: 0 }.field().as_deref(),
            Some("lines[0].unit_price")
        );
        assert_eq!(
            DocumentError::QuantityOutOfRange { line: 2 }.field().as_deref(),
            Some("lines[2].quantity")
        );
        assert_eq!(DocumentError::AmountOutOfRange.field().as_deref(), Some("amount"));
    }
}
