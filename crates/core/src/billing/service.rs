//! Payment allocation engine.
//!
//! Every operation locks the payment first, then allocations, then invoices
//! in id order, and writes all changes through the caller's unit of work.
//! Plans are validated in full before the first row is written.

use std::collections::{BTreeSet, HashMap};

use serde_json::json;
use tally_shared::types::{AllocationId, InvoiceId, PaymentId};

use super::allocation::{AllocationRequest, AutoAllocationStrategy, PlannedAllocation, plan_auto, plan_manual};
use super::error::AllocationError;
use super::invoice::Invoice;
use super::payment::{Payment, PaymentAllocation};
use crate::audit::DomainEvent;
use crate::context::OperationContext;
use crate::store::BillingStore;

/// Event emitted when an allocation is reversed.
pub const ALLOCATION_REVERSED: &str = "payment.allocation.reversed";
/// Event emitted when a payment is reversed.
pub const PAYMENT_REVERSED: &str = "payment.reversed";

/// Result of `allocate` and `auto_allocate`.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// Payment after the allocations.
    pub payment: Payment,
    /// New allocation rows, in plan order.
    pub allocations: Vec<PaymentAllocation>,
    /// Touched invoices after the allocations, in id order.
    pub invoices: Vec<Invoice>,
}

/// Result of `reverse_allocation`.
#[derive(Debug, Clone)]
pub struct AllocationReversal {
    /// The reversed allocation.
    pub allocation: PaymentAllocation,
    /// Payment after the reversal.
    pub payment: Payment,
    /// Invoice after the reversal.
    pub invoice: Invoice,
}

impl AllocationReversal {
    /// The audit event for this reversal.
    #[must_use]
    pub fn event(&self) -> DomainEvent {
        reversal_event(&self.allocation, &self.payment)
    }
}

/// Result of `reverse_payment`.
#[derive(Debug, Clone)]
pub struct PaymentReversal {
    /// The reversed payment.
    pub payment: Payment,
    /// Allocations released by the reversal.
    pub reversed: Vec<PaymentAllocation>,
}

impl PaymentReversal {
    /// One event per released allocation, then one for the payment.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        let currency = self.payment.currency;
        let mut events: Vec<DomainEvent> = self
            .reversed
            .iter()
            .map(|allocation| reversal_event(allocation, &self.payment))
            .collect();
        events.push(DomainEvent::new(
            PAYMENT_REVERSED,
            self.payment.id,
            json!({
                "payment_id": self.payment.id.to_string(),
                "amount": currency.normalize(self.payment.amount).to_string(),
                "released_allocations": self.reversed.len(),
            }),
        ));
        events
    }
}

fn reversal_event(allocation: &PaymentAllocation, payment: &Payment) -> DomainEvent {
    DomainEvent::new(
        ALLOCATION_REVERSED,
        allocation.id,
        json!({
            "allocation_id": allocation.id.to_string(),
            "payment_id": allocation.payment_id.to_string(),
            "invoice_id": allocation.invoice_id.to_string(),
            "amount": payment.currency.normalize(allocation.amount).to_string(),
        }),
    )
}

/// Stateless allocation operations over a [`BillingStore`].
pub struct AllocationEngine;

impl AllocationEngine {
    /// Applies a manual batch of `(invoice, amount)` pairs atomically.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule; nothing is written in that case.
    pub async fn allocate<S>(
        store: &mut S,
        ctx: &OperationContext,
        payment_id: PaymentId,
        requests: &[AllocationRequest],
    ) -> Result<AllocationOutcome, AllocationError>
    where
        S: BillingStore + ?Sized,
    {
        let payment = store.lock_payment(payment_id).await?;
        if payment.is_reversed() {
            return Err(AllocationError::PaymentReversed(payment_id));
        }
        if requests.is_empty() {
            return Err(AllocationError::EmptyBatch);
        }

        let mut ids: Vec<InvoiceId> = requests.iter().map(|r| r.invoice_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let invoices: HashMap<InvoiceId, Invoice> = store
            .lock_invoices(&ids)
            .await?
            .into_iter()
            .map(|invoice| (invoice.id, invoice))
            .collect();

        let plan = plan_manual(&payment, &invoices, requests)?;
        Self::apply(store, ctx, payment, invoices, plan).await
    }

    /// Spreads the payment's remainder over the customer's outstanding invoices.
    ///
    /// # Errors
    ///
    /// Returns `PaymentReversed` or a storage error. Running out of invoices
    /// is not an error.
    pub async fn auto_allocate<S>(
        store: &mut S,
        ctx: &OperationContext,
        payment_id: PaymentId,
        strategy: AutoAllocationStrategy,
    ) -> Result<AllocationOutcome, AllocationError>
    where
        S: BillingStore + ?Sized,
    {
        let payment = store.lock_payment(payment_id).await?;
        if payment.is_reversed() {
            return Err(AllocationError::PaymentReversed(payment_id));
        }

        let outstanding = store
            .lock_outstanding_invoices(payment.customer_id, payment.currency)
            .await?;
        let plan = plan_auto(&payment, outstanding.clone(), strategy);
        let invoices = outstanding.into_iter().map(|invoice| (invoice.id, invoice)).collect();

        Self::apply(store, ctx, payment, invoices, plan).await
    }

    /// Releases one allocation back to its payment and invoice.
    ///
    /// # Errors
    ///
    /// Returns `AllocationReversed` if already reversed, or a storage error.
    pub async fn reverse_allocation<S>(
        store: &mut S,
        ctx: &OperationContext,
        allocation_id: AllocationId,
    ) -> Result<AllocationReversal, AllocationError>
    where
        S: BillingStore + ?Sized,
    {
        let payment_id = store.find_allocation(allocation_id).await?.payment_id;
        let mut payment = store.lock_payment(payment_id).await?;
        let mut allocation = store.lock_allocation(allocation_id).await?;
        if !allocation.is_active() {
            return Err(AllocationError::AllocationReversed(allocation_id));
        }

        let mut invoice = store
            .lock_invoices(&[allocation.invoice_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AllocationError::InvariantViolated(format!("invoice {} missing", allocation.invoice_id)))?;

        invoice.revert_payment(allocation.amount, ctx.now)?;
        payment.release(allocation.amount, ctx.now)?;
        allocation.mark_reversed(ctx.actor.id, ctx.now)?;

        store.save_allocation(&allocation).await?;
        store.save_invoice(&invoice).await?;
        store.save_payment(&payment).await?;

        tracing::info!(
            company_id = %ctx.tenant.company_id(),
            allocation_id = %allocation.id,
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            amount = %allocation.amount,
            "Allocation reversed"
        );

        Ok(AllocationReversal {
            allocation,
            payment,
            invoice,
        })
    }

    /// Reverses every active allocation of a payment, then the payment itself.
    ///
    /// # Errors
    ///
    /// Returns `PaymentReversed` if called twice, or a storage error.
    pub async fn reverse_payment<S>(
        store: &mut S,
        ctx: &OperationContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReversal, AllocationError>
    where
        S: BillingStore + ?Sized,
    {
        let mut payment = store.lock_payment(payment_id).await?;
        if payment.is_reversed() {
            return Err(AllocationError::PaymentReversed(payment_id));
        }

        let mut allocations = store.lock_active_allocations(payment_id).await?;
        let mut ids: Vec<InvoiceId> = allocations.iter().map(|a| a.invoice_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let mut invoices: HashMap<InvoiceId, Invoice> = store
            .lock_invoices(&ids)
            .await?
            .into_iter()
            .map(|invoice| (invoice.id, invoice))
            .collect();

        for allocation in &mut allocations {
            let invoice = invoices.get_mut(&allocation.invoice_id).ok_or_else(|| {
                AllocationError::InvariantViolated(format!("invoice {} missing", allocation.invoice_id))
            })?;
            invoice.revert_payment(allocation.amount, ctx.now)?;
            payment.release(allocation.amount, ctx.now)?;
            allocation.mark_reversed(ctx.actor.id, ctx.now)?;
            store.save_allocation(allocation).await?;
        }

        for id in &ids {
            if let Some(invoice) = invoices.get(id) {
                store.save_invoice(invoice).await?;
            }
        }

        if !payment.allocated.is_zero() {
            return Err(AllocationError::InvariantViolated(format!(
                "payment {} still has {} allocated after releasing all allocations",
                payment.id, payment.allocated
            )));
        }
        payment.mark_reversed(ctx.now)?;
        store.save_payment(&payment).await?;

        tracing::info!(
            company_id = %ctx.tenant.company_id(),
            payment_id = %payment.id,
            released = allocations.len(),
            "Payment reversed"
        );

        Ok(PaymentReversal {
            payment,
            reversed: allocations,
        })
    }

    async fn apply<S>(
        store: &mut S,
        ctx: &OperationContext,
        mut payment: Payment,
        mut invoices: HashMap<InvoiceId, Invoice>,
        plan: Vec<PlannedAllocation>,
    ) -> Result<AllocationOutcome, AllocationError>
    where
        S: BillingStore + ?Sized,
    {
        let mut allocations = Vec::with_capacity(plan.len());
        let mut touched = BTreeSet::new();

        for planned in plan {
            let invoice = invoices.get_mut(&planned.invoice_id).ok_or_else(|| {
                AllocationError::InvariantViolated(format!("invoice {} was not locked", planned.invoice_id))
            })?;
            invoice.apply_payment(planned.amount, ctx.now)?;
            payment.allocate(planned.amount, ctx.now)?;

            let allocation = PaymentAllocation::new(&payment, planned.invoice_id, planned.amount, ctx.actor.id, ctx.now);
            store.insert_allocation(&allocation).await?;
            allocations.push(allocation);
            touched.insert(planned.invoice_id);
        }

        let mut updated = Vec::with_capacity(touched.len());
        for id in touched {
            if let Some(invoice) = invoices.remove(&id) {
                store.save_invoice(&invoice).await?;
                updated.push(invoice);
            }
        }
        if !allocations.is_empty() {
            store.save_payment(&payment).await?;
        }

        tracing::info!(
            company_id = %ctx.tenant.company_id(),
            payment_id = %payment.id,
            allocations = allocations.len(),
            allocated = %payment.allocated,
            "Payment allocated"
        );

        Ok(AllocationOutcome {
            payment,
            allocations,
            invoices: updated,
        })
    }
}
