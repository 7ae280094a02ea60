//! Ledger engine: posting and voiding journal entries.
//!
//! Both operations run inside the caller's unit of work, so a failure at any
//! step leaves nothing persisted once the unit rolls back.

use std::collections::HashMap;

use chrono::NaiveDate;
use tally_shared::types::{AccountId, JournalEntryId, JournalLineId};

use super::balance::{apply_delta, balance_deltas};
use super::error::LedgerError;
use super::types::{
    Account, EntrySource, JournalEntry, JournalEntryDraft, JournalLine, JournalLineDraft, JournalStatus,
    VoidOutcome,
};
use super::validation::{validate_accounts, validate_lines};
use crate::context::OperationContext;
use crate::store::LedgerStore;

/// Stateless ledger operations over a [`LedgerStore`].
pub struct LedgerEngine;

impl LedgerEngine {
    /// Validates and posts a journal entry, updating account balances.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `Unbalanced`, `UnknownAccount`,
    /// `AccountInactive`, `BalanceOutOfRange`, or a storage error.
    pub async fn post<S>(store: &mut S, ctx: &OperationContext, draft: JournalEntryDraft) -> Result<JournalEntry, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        Self::post_draft(store, ctx, draft, true).await
    }

    /// Voids a posted entry by posting its mirror image.
    ///
    /// The original is retained with status `voided` and a link to the
    /// counter-entry. Inactive accounts do not block a void.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyVoided`, `CannotVoidReversal`, or a storage error
    /// (including `NotFound` and tenant mismatch).
    pub async fn void<S>(
        store: &mut S,
        ctx: &OperationContext,
        entry_id: JournalEntryId,
        reason: &str,
    ) -> Result<VoidOutcome, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        let mut original = store.lock_journal_entry(entry_id).await?;
        if original.status == JournalStatus::Voided {
            return Err(LedgerError::AlreadyVoided(entry_id));
        }
        if matches!(original.source, EntrySource::Void(_)) {
            return Err(LedgerError::CannotVoidReversal(entry_id));
        }

        let draft = reversal_draft(&original, reason, ctx.now.date_naive());
        let reversal = Self::post_draft(store, ctx, draft, false).await?;

        original.status = JournalStatus::Voided;
        original.voided_by = Some(reversal.id);
        original.void_reason = Some(reason.to_string());
        original.voided_at = Some(ctx.now);
        store.save_journal_entry_void(&original).await?;

        tracing::info!(
            company_id = %ctx.tenant.company_id(),
            entry_id = %entry_id,
            reversal_id = %reversal.id,
            "Journal entry voided"
        );

        Ok(VoidOutcome { original, reversal })
    }

    async fn post_draft<S>(
        store: &mut S,
        ctx: &OperationContext,
        draft: JournalEntryDraft,
        require_active: bool,
    ) -> Result<JournalEntry, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        let currency = ctx.tenant.base_currency();
        let totals = validate_lines(&draft.lines, currency)?;

        let mut ids: Vec<AccountId> = draft.lines.iter().map(|l| l.account_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let mut accounts: HashMap<AccountId, Account> = store
            .lock_accounts(&ids)
            .await?
            .into_iter()
            .map(|account| (account.id, account))
            .collect();
        validate_accounts(&draft.lines, &accounts, require_active)?;

        let lines = draft
            .lines
            .into_iter()
            .zip(1_i32..)
            .map(|(line, line_no)| JournalLine {
                id: JournalLineId::new(),
                line_no,
                account_id: line.account_id,
                debit: line.debit,
                credit: line.credit,
                memo: line.memo,
            })
            .collect();

        let entry = JournalEntry {
            id: JournalEntryId::new(),
            company_id: ctx.tenant.company_id(),
            entry_date: draft.entry_date,
            description: draft.description,
            reference: draft.reference,
            currency,
            source: draft.source,
            status: JournalStatus::Posted,
            total: totals.debit,
            lines,
            voided_by: None,
            void_reason: None,
            voided_at: None,
            created_by: ctx.actor.id,
            created_at: ctx.now,
        };
        store.insert_journal_entry(&entry).await?;

        for (account_id, delta) in balance_deltas(&entry.lines, &accounts) {
            if let Some(account) = accounts.get_mut(&account_id) {
                apply_delta(account, delta)?;
                store.save_account(account).await?;
            }
        }

        tracing::debug!(
            company_id = %entry.company_id,
            entry_id = %entry.id,
            total = %entry.total,
            lines = entry.lines.len(),
            "Journal entry posted"
        );

        Ok(entry)
    }
}

/// Builds the counter-entry for `original`: every line's sides swapped.
#[must_use]
pub fn reversal_draft(original: &JournalEntry, reason: &str, entry_date: NaiveDate) -> JournalEntryDraft {
    JournalEntryDraft {
        entry_date,
        description: format!("Void of {}: {reason}", original.description),
        reference: original.reference.clone(),
        source: EntrySource::Void(original.id),
        lines: original
            .lines
            .iter()
            .map(|line| JournalLineDraft {
                account_id: line.account_id,
                debit: line.credit,
                credit: line.debit,
                memo: line.memo.clone(),
            })
            .collect(),
    }
}
