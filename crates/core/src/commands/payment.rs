//! Payment commands: record, allocate, auto-allocate and reverse.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tally_shared::types::{AccountId, AllocationId, Currency, CustomerId, InvoiceId, PaymentId};
use validator::Validate;

use super::amount;
use crate::authz::Capability;
use crate::billing::{
    AllocationEngine, AllocationOutcome, AllocationRequest, AutoAllocationStrategy, DocumentError, PaymentDraft,
};
use crate::command::{Command, CommandError};
use crate::context::OperationContext;
use crate::ledger::{EntrySource, JournalEntryDraft, JournalLineDraft, LedgerEngine, LedgerError};
use crate::store::UnitOfWork;

/// Parameters for `payment.create`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreatePaymentParams {
    /// Paying customer.
    pub customer_id: CustomerId,
    /// Date received.
    pub payment_date: NaiveDate,
    /// Amount received, as a decimal string.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// Payment method, e.g. `bank_transfer`.
    #[validate(length(min = 1, max = 50))]
    pub method: Option<String>,
    /// External reference.
    #[validate(length(max = 100))]
    pub reference: Option<String>,
    /// Accounts for the deposit posting; omitted means no posting.
    #[serde(default)]
    pub posting: Option<PaymentPosting>,
}

/// Accounts debited and credited when the payment is posted.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentPosting {
    /// Cash or bank account.
    pub deposit_account_id: AccountId,
    /// Accounts receivable.
    pub receivable_account_id: AccountId,
}

/// Records a customer payment and optionally posts Dr deposit / Cr receivable.
pub struct CreatePayment;

#[async_trait]
impl<U: UnitOfWork> Command<U> for CreatePayment {
    type Params = CreatePaymentParams;

    const NAME: &'static str = "payment.create";
    const CAPABILITY: Capability = Capability::ManagePayments;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let customer = uow.find_customer(params.customer_id).await?;
        if !customer.is_active {
            return Err(DocumentError::CustomerInactive(customer.id).into());
        }

        let currency = ctx.tenant.base_currency();
        let mut payment = PaymentDraft {
            customer_id: customer.id,
            payment_date: params.payment_date,
            amount: params.amount,
            method: params.method,
            reference: params.reference,
        }
        .build(ctx.tenant.company_id(), currency, ctx.actor.id, ctx.now)?;

        if let Some(posting) = params.posting {
            let entry = LedgerEngine::post(
                uow,
                ctx,
                JournalEntryDraft {
                    entry_date: payment.payment_date,
                    description: format!("Payment from customer {}", customer.name),
                    reference: payment.reference.clone(),
                    source: EntrySource::Payment(payment.id),
                    lines: vec![
                        JournalLineDraft::debit(posting.deposit_account_id, payment.amount),
                        JournalLineDraft::credit(posting.receivable_account_id, payment.amount),
                    ],
                },
            )
            .await?;
            payment.journal_entry_id = Some(entry.id);
        }

        uow.insert_payment(&payment).await?;

        Ok(json!({
            "id": payment.id.to_string(),
            "customer_id": payment.customer_id.to_string(),
            "currency": currency.code(),
            "amount": amount(currency, payment.amount),
            "allocated": amount(currency, payment.allocated),
            "unallocated": amount(currency, payment.unallocated()),
            "status": payment.status.as_str(),
            "journal_entry_id": payment.journal_entry_id.map(|id| id.to_string()),
        }))
    }
}

/// Parameters for `payment.allocate`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AllocatePaymentParams {
    /// Source payment.
    pub payment_id: PaymentId,
    /// Requested pairs, applied all-or-nothing.
    #[validate(length(min = 1, max = 500))]
    pub allocations: Vec<AllocationParams>,
}

/// One requested `(invoice, amount)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationParams {
    /// Target invoice.
    pub invoice_id: InvoiceId,
    /// Amount, as a decimal string.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

/// Allocates a payment to invoices chosen by the caller.
pub struct AllocatePayment;

#[async_trait]
impl<U: UnitOfWork> Command<U> for AllocatePayment {
    type Params = AllocatePaymentParams;

    const NAME: &'static str = "payment.allocate";
    const CAPABILITY: Capability = Capability::AllocatePayments;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let requests: Vec<AllocationRequest> = params
            .allocations
            .iter()
            .map(|pair| AllocationRequest {
                invoice_id: pair.invoice_id,
                amount: pair.amount,
            })
            .collect();
        let outcome = AllocationEngine::allocate(uow, ctx, params.payment_id, &requests).await?;
        Ok(allocation_result(&outcome))
    }
}

/// Parameters for `payment.allocate.auto`.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AutoAllocateParams {
    /// Source payment.
    pub payment_id: PaymentId,
    /// Invoice ordering; defaults to oldest due first.
    #[serde(default)]
    pub strategy: AutoAllocationStrategy,
}

/// Spreads a payment's remainder over the customer's outstanding invoices.
pub struct AutoAllocatePayment;

#[async_trait]
impl<U: UnitOfWork> Command<U> for AutoAllocatePayment {
    type Params = AutoAllocateParams;

    const NAME: &'static str = "payment.allocate.auto";
    const CAPABILITY: Capability = Capability::AllocatePayments;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let outcome = AllocationEngine::auto_allocate(uow, ctx, params.payment_id, params.strategy).await?;
        Ok(allocation_result(&outcome))
    }
}

fn allocation_result(outcome: &AllocationOutcome) -> Value {
    let payment = &outcome.payment;
    let currency = payment.currency;
    json!({
        "id": payment.id.to_string(),
        "allocations": outcome
            .allocations
            .iter()
            .map(|a| json!({
                "id": a.id.to_string(),
                "invoice_id": a.invoice_id.to_string(),
                "amount": amount(currency, a.amount),
            }))
            .collect::<Vec<_>>(),
        "invoices": outcome
            .invoices
            .iter()
            .map(|i| invoice_balance(currency, i.id, i.paid, i.balance_due(), i.status.as_str()))
            .collect::<Vec<_>>(),
        "allocated": amount(currency, payment.allocated),
        "unallocated": amount(currency, payment.unallocated()),
    })
}

fn invoice_balance(currency: Currency, id: InvoiceId, paid: Decimal, balance_due: Decimal, status: &str) -> Value {
    json!({
        "id": id.to_string(),
        "paid": amount(currency, paid),
        "balance_due": amount(currency, balance_due),
        "status": status,
    })
}

/// Parameters for `payment.allocation.reverse`.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReverseAllocationParams {
    /// Allocation to release.
    pub allocation_id: AllocationId,
}

/// Releases one allocation back to its payment and invoice.
pub struct ReverseAllocation;

#[async_trait]
impl<U: UnitOfWork> Command<U> for ReverseAllocation {
    type Params = ReverseAllocationParams;

    const NAME: &'static str = "payment.allocation.reverse";
    const CAPABILITY: Capability = Capability::ReverseTransactions;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let reversal = AllocationEngine::reverse_allocation(uow, ctx, params.allocation_id).await?;
        uow.emit(reversal.event());

        let currency = reversal.payment.currency;
        let invoice = &reversal.invoice;
        Ok(json!({
            "id": reversal.allocation.id.to_string(),
            "payment_id": reversal.payment.id.to_string(),
            "invoice_id": invoice.id.to_string(),
            "amount": amount(currency, reversal.allocation.amount),
            "status": reversal.allocation.status.as_str(),
            "invoice": invoice_balance(currency, invoice.id, invoice.paid, invoice.balance_due(), invoice.status.as_str()),
            "allocated": amount(currency, reversal.payment.allocated),
            "unallocated": amount(currency, reversal.payment.unallocated()),
        }))
    }
}

/// Parameters for `payment.reverse`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReversePaymentParams {
    /// Payment to reverse.
    pub payment_id: PaymentId,
    /// Reason recorded on the voided posting.
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
}

/// Reverses every allocation of a payment, the payment, and its posting.
pub struct ReversePayment;

#[async_trait]
impl<U: UnitOfWork> Command<U> for ReversePayment {
    type Params = ReversePaymentParams;

    const NAME: &'static str = "payment.reverse";
    const CAPABILITY: Capability = Capability::ReverseTransactions;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let reversal = AllocationEngine::reverse_payment(uow, ctx, params.payment_id).await?;

        let mut void_entry_id = None;
        if let Some(entry_id) = reversal.payment.journal_entry_id {
            let reason = params.reason.as_deref().unwrap_or("Payment reversed");
            match LedgerEngine::void(uow, ctx, entry_id, reason).await {
                Ok(voided) => void_entry_id = Some(voided.reversal.id),
                Err(LedgerError::AlreadyVoided(_)) => {
                    tracing::debug!(payment_id = %reversal.payment.id, %entry_id, "Payment posting already voided");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for event in reversal.events() {
            uow.emit(event);
        }

        Ok(json!({
            "id": reversal.payment.id.to_string(),
            "status": reversal.payment.status.as_str(),
            "reversed_allocations": reversal
                .reversed
                .iter()
                .map(|a| a.id.to_string())
                .collect::<Vec<_>>(),
            "void_entry_id": void_entry_id.map(|id| id.to_string()),
        }))
    }
}
