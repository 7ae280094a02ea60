//! Customers and invoices.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{CompanyId, Currency, CustomerId, InvoiceId, JournalEntryId, UserId, fits_storage};

use super::error::{AllocationError, DocumentError};

/// A customer that invoices and payments are issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer ID.
    pub id: CustomerId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Display name.
    pub name: String,
    /// Whether new documents may reference the customer.
    pub is_active: bool,
}

/// Invoice payment status, derived from `paid` and `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Nothing paid.
    Open,
    /// Partly paid.
    PartiallyPaid,
    /// Fully paid.
    Paid,
}

impl InvoiceStatus {
    /// Derives the status from the amounts.
    #[must_use]
    pub fn from_amounts(total: Decimal, paid: Decimal) -> Self {
        if paid.is_zero() {
            Self::Open
        } else if paid < total {
            Self::PartiallyPaid
        } else {
            Self::Paid
        }
    }

    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "paid" => Ok(Self::Paid),
            other => Err(format!("Unknown invoice status: {other}")),
        }
    }
}

/// An invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// 1-based position.
    pub line_no: i32,
    /// Description.
    pub description: String,
    /// Quantity.
    pub quantity: Decimal,
    /// Unit price.
    pub unit_price: Decimal,
    /// `quantity * unit_price` rounded to the currency's minor units.
    pub amount: Decimal,
}

/// A customer invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Billed customer.
    pub customer_id: CustomerId,
    /// Invoice number, unique per company.
    pub number: String,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Due date; drives auto-allocation order.
    pub due_date: NaiveDate,
    /// Currency of every amount.
    pub currency: Currency,
    /// Sum of line amounts.
    pub total: Decimal,
    /// Accumulated allocations.
    pub paid: Decimal,
    /// Derived status.
    pub status: InvoiceStatus,
    /// Lines.
    pub lines: Vec<InvoiceLine>,
    /// Receivable posting, when one was made.
    pub journal_entry_id: Option<JournalEntryId>,
    /// Free-form memo.
    pub memo: Option<String>,
    /// Creating actor.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change of `paid`.
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Amount still owed.
    #[must_use]
    pub fn balance_due(&self) -> Decimal {
        self.total - self.paid
    }

    /// Returns true if anything is still owed.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.balance_due() > Decimal::ZERO
    }

    /// Records an allocation against the invoice.
    ///
    /// # Errors
    ///
    /// Returns `ExceedsBalanceDue` if the amount is larger than the balance due.
    pub fn apply_payment(&mut self, amount: Decimal, at: DateTime<Utc>) -> Result<(), AllocationError> {
        if amount > self.balance_due() {
            return Err(AllocationError::ExceedsBalanceDue {
                invoice_id: self.id,
                requested: amount,
                balance_due: self.balance_due(),
            });
        }
        self.paid += amount;
        self.refresh(at);
        Ok(())
    }

    /// Undoes an allocation.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` if `paid` would become negative.
    pub fn revert_payment(&mut self, amount: Decimal, at: DateTime<Utc>) -> Result<(), AllocationError> {
        if amount > self.paid {
            return Err(AllocationError::InvariantViolated(format!(
                "invoice {} paid {} cannot be reduced by {amount}",
                self.id, self.paid
            )));
        }
        self.paid -= amount;
        self.refresh(at);
        Ok(())
    }

    fn refresh(&mut self, at: DateTime<Utc>) {
        self.status = InvoiceStatus::from_amounts(self.total, self.paid);
        self.updated_at = at;
    }
}

/// Input line for a new invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceLineDraft {
    /// Description.
    pub description: String,
    /// Quantity.
    pub quantity: Decimal,
    /// Unit price.
    pub unit_price: Decimal,
}

/// Input for a new invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDraft {
    /// Billed customer.
    pub customer_id: CustomerId,
    /// Invoice number.
    pub number: String,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Due date.
    pub due_date: NaiveDate,
    /// Lines.
    pub lines: Vec<InvoiceLineDraft>,
    /// Memo.
    pub memo: Option<String>,
}

impl InvoiceDraft {
    /// Prices the lines and builds an open invoice.
    ///
    /// Quantities and unit prices keep at most four decimals. Line amounts are
    /// rounded to the currency's minor units with banker's rounding; the total
    /// is the sum of the rounded amounts.
    ///
    /// # Errors
    ///
    /// Returns a `DocumentError` for the first invalid line or date.
    pub fn build(
        self,
        company_id: CompanyId,
        currency: Currency,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Invoice, DocumentError> {
        if self.lines.is_empty() {
            return Err(DocumentError::NoLines);
        }
        if self.due_date < self.issue_date {
            return Err(DocumentError::DueBeforeIssue);
        }

        let mut lines = Vec::with_capacity(self.lines.len());
        let mut total = Decimal::ZERO;
        for (line, (draft, line_no)) in self.lines.into_iter().zip(1_i32..).enumerate() {
            if draft.quantity <= Decimal::ZERO {
                return Err(DocumentError::NonPositiveQuantity { line });
            }
            if draft.unit_price < Decimal::ZERO {
                return Err(DocumentError::NegativeUnitPrice { line });
            }
            if !fits_storage(draft.quantity) {
                return Err(DocumentError::QuantityOutOfRange { line });
            }
            if !fits_storage(draft.unit_price) {
                return Err(DocumentError::UnitPriceOutOfRange { line });
            }
            let amount = draft
                .quantity
                .checked_mul(draft.unit_price)
                .map(|amount| currency.round(amount))
                .filter(|amount| fits_storage(*amount))
                .ok_or(DocumentError::LineAmountOutOfRange { line })?;
            total = total
                .checked_add(amount)
                .filter(|total| fits_storage(*total))
                .ok_or(DocumentError::TotalOutOfRange)?;
            lines.push(InvoiceLine {
                line_no,
                description: draft.description,
                quantity: draft.quantity,
                unit_price: draft.unit_price,
                amount,
            });
        }

        if total <= Decimal::ZERO {
            return Err(DocumentError::NonPositiveTotal);
        }

        Ok(Invoice {
            id: InvoiceId::new(),
            company_id,
            customer_id: self.customer_id,
            number: self.number,
            issue_date: self.issue_date,
            due_date: self.due_date,
            currency,
            total,
            paid: Decimal::ZERO,
            status: InvoiceStatus::Open,
            lines,
            journal_entry_id: None,
            memo: self.memo,
            created_by,
            created_at: at,
            updated_at: at,
        })
    }
}
