//! `invoice.create`.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tally_shared::types::{AccountId, CustomerId};
use validator::Validate;

use super::amount;
use crate::authz::Capability;
use crate::billing::{DocumentError, InvoiceDraft, InvoiceLineDraft};
use crate::command::{Command, CommandError};
use crate::context::OperationContext;
use crate::ledger::{EntrySource, JournalEntryDraft, JournalLineDraft, LedgerEngine};
use crate::store::UnitOfWork;

/// Parameters for `invoice.create`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateInvoiceParams {
    /// Billed customer.
    pub customer_id: CustomerId,
    /// Invoice number, unique per company.
    #[validate(length(min = 1, max = 50))]
    pub number: String,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Due date.
    pub due_date: NaiveDate,
    /// Invoice lines.
    #[validate(nested)]
    pub lines: Vec<InvoiceLineParams>,
    /// Free-text memo.
    #[validate(length(max = 1000))]
    pub memo: Option<String>,
    /// Accounts for the receivable posting; omitted means no posting.
    #[serde(default)]
    pub posting: Option<InvoicePosting>,
}

/// One invoice line.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct InvoiceLineParams {
    /// Line description.
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    /// Quantity, as a decimal string.
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// Unit price, as a decimal string.
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
}

/// Accounts debited and credited when the invoice is posted.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvoicePosting {
    /// Accounts receivable.
    pub receivable_account_id: AccountId,
    /// Sales revenue.
    pub revenue_account_id: AccountId,
}

/// Creates an invoice and optionally posts Dr receivable / Cr revenue.
pub struct CreateInvoice;

#[async_trait]
impl<U: UnitOfWork> Command<U> for CreateInvoice {
    type Params = CreateInvoiceParams;

    const NAME: &'static str = "invoice.create";
    const CAPABILITY: Capability = Capability::ManageInvoices;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let customer = uow.find_customer(params.customer_id).await?;
        if !customer.is_active {
            return Err(DocumentError::CustomerInactive(customer.id).into());
        }

        let currency = ctx.tenant.base_currency();
        let draft = InvoiceDraft {
            customer_id: customer.id,
            number: params.number,
            issue_date: params.issue_date,
            due_date: params.due_date,
            lines: params
                .lines
                .into_iter()
                .map(|line| InvoiceLineDraft {
                    description: line.description,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            memo: params.memo,
        };
        let mut invoice = draft.build(ctx.tenant.company_id(), currency, ctx.actor.id, ctx.now)?;

        if let Some(posting) = params.posting {
            let entry = LedgerEngine::post(
                uow,
                ctx,
                JournalEntryDraft {
                    entry_date: invoice.issue_date,
                    description: format!("Invoice {}", invoice.number),
                    reference: Some(invoice.number.clone()),
                    source: EntrySource::Invoice(invoice.id),
                    lines: vec![
                        JournalLineDraft::debit(posting.receivable_account_id, invoice.total),
                        JournalLineDraft::credit(posting.revenue_account_id, invoice.total),
                    ],
                },
            )
            .await?;
            invoice.journal_entry_id = Some(entry.id);
        }

        uow.insert_invoice(&invoice).await?;

        Ok(json!({
            "id": invoice.id.to_string(),
            "number": invoice.number,
            "customer_id": invoice.customer_id.to_string(),
            "currency": currency.code(),
            "total": amount(currency, invoice.total),
            "paid": amount(currency, invoice.paid),
            "balance_due": amount(currency, invoice.balance_due()),
            "status": invoice.status.as_str(),
            "journal_entry_id": invoice.journal_entry_id.map(|id| id.to_string()),
        }))
    }
}
