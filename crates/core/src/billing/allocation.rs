//! Allocation planning.
//!
//! Planning is pure: it takes locked snapshots of a payment and its invoices
//! and decides how much goes where. The engine then applies the plan in the
//! same transaction that holds the row locks.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{InvoiceId, fits_storage};

use super::error::AllocationError;
use super::invoice::Invoice;
use super::payment::Payment;

/// One requested `(invoice, amount)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Target invoice.
    pub invoice_id: InvoiceId,
    /// Requested amount.
    pub amount: Decimal,
}

/// One planned allocation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedAllocation {
    /// Target invoice.
    pub invoice_id: InvoiceId,
    /// Amount to allocate.
    pub amount: Decimal,
}

/// Ordering used by automatic allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAllocationStrategy {
    /// Earliest due date first.
    #[default]
    OldestDueFirst,
    /// Latest due date first.
    NewestDueFirst,
}

impl AutoAllocationStrategy {
    /// Sorts invoices in allocation order. Invoice id breaks ties in both directions.
    pub fn order(self, invoices: &mut [Invoice]) {
        match self {
            Self::OldestDueFirst => invoices.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id))),
            Self::NewestDueFirst => invoices.sort_by(|a, b| b.due_date.cmp(&a.due_date).then(a.id.cmp(&b.id))),
        }
    }
}

/// Validates a manual batch and returns it as a plan.
///
/// Checks are cumulative: two pairs naming the same invoice are validated
/// against its balance due together, and the batch sum is validated against
/// the payment's remainder. Any failure rejects the whole batch.
///
/// `invoices` must contain every requested invoice, already tenant-checked.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn plan_manual(
    payment: &Payment,
    invoices: &HashMap<InvoiceId, Invoice>,
    requests: &[AllocationRequest],
) -> Result<Vec<PlannedAllocation>, AllocationError> {
    if payment.is_reversed() {
        return Err(AllocationError::PaymentReversed(payment.id));
    }
    if requests.is_empty() {
        return Err(AllocationError::EmptyBatch);
    }

    let currency = payment.currency;
    let mut per_invoice: HashMap<InvoiceId, Decimal> = HashMap::new();
    let mut batch_total = Decimal::ZERO;
    let mut plan = Vec::with_capacity(requests.len());

    for (index, request) in requests.iter().enumerate() {
        if request.amount <= Decimal::ZERO {
            return Err(AllocationError::NonPositiveAmount { index });
        }
        if !currency.fits_precision(request.amount) {
            return Err(AllocationError::PrecisionExceeded {
                index,
                minor_units: currency.minor_units(),
            });
        }
        if !fits_storage(request.amount) {
            return Err(AllocationError::AmountOutOfRange { index });
        }

        let invoice = invoices.get(&request.invoice_id).ok_or_else(|| {
            AllocationError::InvariantViolated(format!("invoice {} was not loaded", request.invoice_id))
        })?;
        if invoice.customer_id != payment.customer_id {
            return Err(AllocationError::CustomerMismatch {
                invoice_id: invoice.id,
            });
        }

        let requested = per_invoice.entry(invoice.id).or_insert(Decimal::ZERO);
        *requested = requested
            .checked_add(request.amount)
            .ok_or(AllocationError::AmountOutOfRange { index })?;
        if *requested > invoice.balance_due() {
            return Err(AllocationError::ExceedsBalanceDue {
                invoice_id: invoice.id,
                requested: currency.normalize(*requested),
                balance_due: currency.normalize(invoice.balance_due()),
            });
        }

        batch_total = batch_total
            .checked_add(request.amount)
            .ok_or(AllocationError::AmountOutOfRange { index })?;
        if batch_total > payment.unallocated() {
            return Err(AllocationError::ExceedsUnallocated {
                requested: currency.normalize(batch_total),
                unallocated: currency.normalize(payment.unallocated()),
            });
        }

        plan.push(PlannedAllocation {
            invoice_id: invoice.id,
            amount: request.amount,
        });
    }

    Ok(plan)
}

/// Greedily spreads the payment's remainder over outstanding invoices.
///
/// Invoices are visited in `strategy` order; each receives
/// `min(remaining, balance_due)`. A leftover remainder is not an error.
#[must_use]
pub fn plan_auto(
    payment: &Payment,
    mut invoices: Vec<Invoice>,
    strategy: AutoAllocationStrategy,
) -> Vec<PlannedAllocation> {
    if payment.is_reversed() {
        return Vec::new();
    }

    strategy.order(&mut invoices);

    let mut remaining = payment.unallocated();
    let mut plan = Vec::new();
    for invoice in invoices {
        if remaining <= Decimal::ZERO {
            break;
        }
        if invoice.customer_id != payment.customer_id || !invoice.is_outstanding() {
            continue;
        }
        let amount = remaining.min(invoice.balance_due());
        remaining -= amount;
        plan.push(PlannedAllocation {
            invoice_id: invoice.id,
            amount,
        });
    }
    plan
}
