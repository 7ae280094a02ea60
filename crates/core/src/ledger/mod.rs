//! Double-entry bookkeeping.
//!
//! This module implements the ledger invariant engine:
//! - Journal entry drafts and persisted entries
//! - Line and balance validation in decimal arithmetic
//! - Account balance deltas by normal side
//! - Posting and voiding through the [`LedgerStore`](crate::store::LedgerStore) port

pub mod balance;
pub mod error;
pub mod service;
pub mod types;
pub mod validation;

#[cfg(test)]
mod validation_props;

pub use error::LedgerError;
pub use service::{LedgerEngine, reversal_draft};
pub use types::{
    Account, AccountType, EntrySource, EntryTotals, JournalEntry, JournalEntryDraft, JournalLine, JournalLineDraft,
    JournalStatus, VoidOutcome,
};
pub use validation::{validate_accounts, validate_lines};
