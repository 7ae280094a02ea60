//! `journal.post` and `journal.void`.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tally_shared::types::{AccountId, JournalEntryId};
use validator::Validate;

use super::amount;
use crate::authz::Capability;
use crate::command::{Command, CommandError};
use crate::context::OperationContext;
use crate::ledger::{EntrySource, JournalEntryDraft, JournalLineDraft, LedgerEngine};
use crate::store::UnitOfWork;

/// Parameters for `journal.post`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PostJournalParams {
    /// Accounting date.
    pub entry_date: NaiveDate,
    /// Entry description.
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    /// External reference.
    #[validate(length(max = 100))]
    pub reference: Option<String>,
    /// Entry lines, in order.
    #[validate(nested)]
    pub lines: Vec<JournalLineParams>,
}

/// One journal line. Exactly one side must be positive.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct JournalLineParams {
    /// Account posted to.
    pub account_id: AccountId,
    /// Debit amount, as a decimal string.
    #[serde(default, with = "rust_decimal::serde::str")]
    pub debit: Decimal,
    /// Credit amount, as a decimal string.
    #[serde(default, with = "rust_decimal::serde::str")]
    pub credit: Decimal,
    /// Line memo.
    #[validate(length(max = 500))]
    pub memo: Option<String>,
}

/// Posts a manual journal entry.
pub struct PostJournal;

#[async_trait]
impl<U: UnitOfWork> Command<U> for PostJournal {
    type Params = PostJournalParams;

    const NAME: &'static str = "journal.post";
    const CAPABILITY: Capability = Capability::PostJournal;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let draft = JournalEntryDraft {
            entry_date: params.entry_date,
            description: params.description,
            reference: params.reference,
            source: EntrySource::Manual,
            lines: params
                .lines
                .into_iter()
                .map(|line| JournalLineDraft {
                    account_id: line.account_id,
                    debit: line.debit,
                    credit: line.credit,
                    memo: line.memo,
                })
                .collect(),
        };
        let entry = LedgerEngine::post(uow, ctx, draft).await?;

        let currency = entry.currency;
        let totals = entry.totals();
        Ok(json!({
            "id": entry.id.to_string(),
            "entry_date": entry.entry_date.to_string(),
            "currency": currency.code(),
            "status": entry.status.as_str(),
            "total_debit": amount(currency, totals.debit),
            "total_credit": amount(currency, totals.credit),
            "lines": entry
                .lines
                .iter()
                .map(|line| json!({
                    "line_no": line.line_no,
                    "account_id": line.account_id.to_string(),
                    "debit": amount(currency, line.debit),
                    "credit": amount(currency, line.credit),
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

/// Parameters for `journal.void`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct VoidJournalParams {
    /// Entry to void.
    pub entry_id: JournalEntryId,
    /// Why the entry is voided.
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Voids a posted entry by posting its mirror image.
pub struct VoidJournal;

#[async_trait]
impl<U: UnitOfWork> Command<U> for VoidJournal {
    type Params = VoidJournalParams;

    const NAME: &'static str = "journal.void";
    const CAPABILITY: Capability = Capability::VoidJournal;

    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError> {
        let outcome = LedgerEngine::void(uow, ctx, params.entry_id, &params.reason).await?;
        Ok(json!({
            "id": outcome.original.id.to_string(),
            "status": outcome.original.status.as_str(),
            "reversal_entry_id": outcome.reversal.id.to_string(),
            "total": amount(outcome.reversal.currency, outcome.reversal.total),
        }))
    }
}
