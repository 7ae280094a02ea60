//! Account balance updates.
//!
//! Balances are kept in each account's normal direction:
//! - Asset/Expense: `balance += debit - credit`
//! - Liability/Equity/Revenue: `balance += credit - debit`

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use tally_shared::types::{AccountId, fits_storage};

use super::error::LedgerError;
use super::types::{Account, JournalLine};

/// Net balance change per account for a set of posted lines.
///
/// Returned in account id order, which is also the lock order.
/// Accounts missing from `accounts` are skipped; callers validate them first.
#[must_use]
pub fn balance_deltas(
    lines: &[JournalLine],
    accounts: &HashMap<AccountId, Account>,
) -> BTreeMap<AccountId, Decimal> {
    let mut deltas = BTreeMap::new();
    for line in lines {
        let Some(account) = accounts.get(&line.account_id) else {
            continue;
        };
        *deltas.entry(line.account_id).or_insert(Decimal::ZERO) +=
            account.account_type.balance_change(line.debit, line.credit);
    }
    deltas
}

/// Applies a balance change and bumps the account version.
///
/// # Errors
///
/// Returns `BalanceOutOfRange` if the new balance cannot be stored. The
/// account is left unchanged.
pub fn apply_delta(account: &mut Account, delta: Decimal) -> Result<(), LedgerError> {
    let balance = account
        .balance
        .checked_add(delta)
        .filter(|balance| fits_storage(*balance))
        .ok_or(LedgerError::BalanceOutOfRange(account.id))?;
    account.balance = balance;
    account.version += 1;
    Ok(())
}
