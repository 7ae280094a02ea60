//! Payments and payment allocations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{
    AllocationId, CompanyId, Currency, CustomerId, InvoiceId, JournalEntryId, PaymentId, UserId, fits_storage,
};

use super::error::{AllocationError, DocumentError};

/// Payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// May be allocated.
    Active,
    /// Reversed; all allocations released.
    Reversed,
}

impl PaymentStatus {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Reversed => "reversed",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "reversed" => Ok(Self::Reversed),
            other => Err(format!("Unknown payment status: {other}")),
        }
    }
}

/// A received customer payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID.
    pub id: PaymentId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Paying customer.
    pub customer_id: CustomerId,
    /// Date received.
    pub payment_date: NaiveDate,
    /// Currency of every amount.
    pub currency: Currency,
    /// Amount received.
    pub amount: Decimal,
    /// Sum of active allocations.
    pub allocated: Decimal,
    /// Lifecycle status.
    pub status: PaymentStatus,
    /// Payment method (e.g. `bank_transfer`).
    pub method: Option<String>,
    /// External reference.
    pub reference: Option<String>,
    /// Deposit posting, when one was made.
    pub journal_entry_id: Option<JournalEntryId>,
    /// Creating actor.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Reversal time.
    pub reversed_at: Option<DateTime<Utc>>,
}

/// Input for a new payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDraft {
    /// Paying customer.
    pub customer_id: CustomerId,
    /// Date received.
    pub payment_date: NaiveDate,
    /// Amount received.
    pub amount: Decimal,
    /// Payment method.
    pub method: Option<String>,
    /// External reference.
    pub reference: Option<String>,
}

impl PaymentDraft {
    /// Builds an active, unallocated payment.
    ///
    /// # Errors
    ///
    /// Returns a `DocumentError` if the amount is not positive, too precise or
    /// too large to store.
    pub fn build(
        self,
        company_id: CompanyId,
        currency: Currency,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Payment, DocumentError> {
        if self.amount <= Decimal::ZERO {
            return Err(DocumentError::NonPositiveTotal);
        }
        if !currency.fits_precision(self.amount) {
            return Err(DocumentError::PrecisionExceeded {
                minor_units: currency.minor_units(),
            });
        }
        if !fits_storage(self.amount) {
            return Err(DocumentError::AmountOutOfRange);
        }
        Ok(Payment {
            id: PaymentId::new(),
            company_id,
            customer_id: self.customer_id,
            payment_date: self.payment_date,
            currency,
            amount: self.amount,
            allocated: Decimal::ZERO,
            status: PaymentStatus::Active,
            method: self.method,
            reference: self.reference,
            journal_entry_id: None,
            created_by,
            created_at: at,
            updated_at: at,
            reversed_at: None,
        })
    }
}

impl Payment {
    /// Amount not yet allocated.
    #[must_use]
    pub fn unallocated(&self) -> Decimal {
        self.amount - self.allocated
    }

    /// Returns true once the payment has been reversed.
    #[must_use]
    pub fn is_reversed(&self) -> bool {
        self.status == PaymentStatus::Reversed
    }

    /// Consumes part of the unallocated remainder.
    ///
    /// # Errors
    ///
    /// Returns `PaymentReversed` or `ExceedsUnallocated`.
    pub fn allocate(&mut self, amount: Decimal, at: DateTime<Utc>) -> Result<(), AllocationError> {
        if self.is_reversed() {
            return Err(AllocationError::PaymentReversed(self.id));
        }
        if amount > self.unallocated() {
            return Err(AllocationError::ExceedsUnallocated {
                requested: amount,
                unallocated: self.unallocated(),
            });
        }
        self.allocated += amount;
        self.updated_at = at;
        Ok(())
    }

    /// Returns an allocated amount to the remainder.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` if `allocated` would become negative.
    pub fn release(&mut self, amount: Decimal, at: DateTime<Utc>) -> Result<(), AllocationError> {
        if amount > self.allocated {
            return Err(AllocationError::InvariantViolated(format!(
                "payment {} allocated {} cannot be reduced by {amount}",
                self.id, self.allocated
            )));
        }
        self.allocated -= amount;
        self.updated_at = at;
        Ok(())
    }

    /// Marks the payment reversed. Allocations must already be released.
    ///
    /// # Errors
    ///
    /// Returns `PaymentReversed` if called twice.
    pub fn mark_reversed(&mut self, at: DateTime<Utc>) -> Result<(), AllocationError> {
        if self.is_reversed() {
            return Err(AllocationError::PaymentReversed(self.id));
        }
        self.status = PaymentStatus::Reversed;
        self.reversed_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

/// Allocation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    /// Counted in invoice paid and payment allocated.
    Active,
    /// Released; retained for history.
    Reversed,
}

impl AllocationStatus {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Reversed => "reversed",
        }
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "reversed" => Ok(Self::Reversed),
            other => Err(format!("Unknown allocation status: {other}")),
        }
    }
}

/// A link between part of a payment and an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    /// Allocation ID.
    pub id: AllocationId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Source payment.
    pub payment_id: PaymentId,
    /// Target invoice.
    pub invoice_id: InvoiceId,
    /// Allocated amount.
    pub amount: Decimal,
    /// Lifecycle status.
    pub status: AllocationStatus,
    /// Creating actor.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Reversing actor.
    pub reversed_by: Option<UserId>,
    /// Reversal time.
    pub reversed_at: Option<DateTime<Utc>>,
}

impl PaymentAllocation {
    /// Creates an active allocation.
    #[must_use]
    pub fn new(
        payment: &Payment,
        invoice_id: InvoiceId,
        amount: Decimal,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AllocationId::new(),
            company_id: payment.company_id,
            payment_id: payment.id,
            invoice_id,
            amount,
            status: AllocationStatus::Active,
            created_by,
            created_at: at,
            reversed_by: None,
            reversed_at: None,
        }
    }

    /// Returns true while the allocation counts toward balances.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }

    /// Marks the allocation reversed.
    ///
    /// # Errors
    ///
    /// Returns `AllocationReversed` if called twice.
    pub fn mark_reversed(&mut self, by: UserId, at: DateTime<Utc>) -> Result<(), AllocationError> {
        if !self.is_active() {
            return Err(AllocationError::AllocationReversed(self.id));
        }
        self.status = AllocationStatus::Reversed;
        self.reversed_by = Some(by);
        self.reversed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft(amount: Decimal) -> PaymentDraft {
        PaymentDraft {
            customer_id: CustomerId::new(),
            payment_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            amount,
            method: None,
            reference: None,
        }
    }

    fn payment(amount: Decimal) -> Payment {
        draft(amount)
            .build(CompanyId::new(), Currency::Usd, UserId::new(), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_build_validates_amount() {
        let build = |amount| draft(amount).build(CompanyId::new(), Currency::Usd, UserId::new(), Utc::now());
        assert!(matches!(build(dec!(0)), Err(DocumentError::NonPositiveTotal)));
        assert!(matches!(
            build(dec!(10.001)),
            Err(DocumentError::PrecisionExceeded { minor_units: 2 })
        ));
        assert!(matches!(build(Decimal::MAX), Err(DocumentError::AmountOutOfRange)));
        assert!(matches!(
            build(dec!(10000000000000000.00)),
            Err(DocumentError::AmountOutOfRange)
        ));
        assert_eq!(build(dec!(60.00)).unwrap().unallocated(), dec!(60.00));
    }

    #[test]
    fn test_allocate_and_release() {
        let now = Utc::now();
        let mut payment = payment(dec!(60.00));
        payment.allocate(dec!(45.00), now).unwrap();
        assert_eq!(payment.unallocated(), dec!(15.00));

        assert!(matches!(
            payment.allocate(dec!(15.01), now),
            Err(AllocationError::ExceedsUnallocated { .. })
        ));

        payment.release(dec!(45.00), now).unwrap();
        assert_eq!(payment.allocated, dec!(0.00));
        assert!(payment.release(dec!(0.01), now).is_err());
    }

    #[test]
    fn test_reversed_payment_cannot_be_allocated_or_reversed_again() {
        let now = Utc::now();
        let mut payment = payment(dec!(10.00));
        payment.mark_reversed(now).unwrap();
        assert!(matches!(
            payment.allocate(dec!(1.00), now),
            Err(AllocationError::PaymentReversed(_))
        ));
        assert!(matches!(
            payment.mark_reversed(now),
            Err(AllocationError::PaymentReversed(_))
        ));
    }

    #[test]
    fn test_allocation_reversal_is_one_shot() {
        let now = Utc::now();
        let payment = payment(dec!(10.00));
        let mut allocation =
            PaymentAllocation::new(&payment, InvoiceId::new(), dec!(10.00), UserId::new(), now);
        allocation.mark_reversed(UserId::new(), now).unwrap();
        assert!(!allocation.is_active());
        assert!(matches!(
            allocation.mark_reversed(UserId::new(), now),
            Err(AllocationError::AllocationReversed(_))
        ));
    }
}
