//! Business rule validation for journal entries.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tally_shared::types::{AccountId, Currency, fits_storage};

use super::error::LedgerError;
use super::types::{Account, EntryTotals, JournalLineDraft};

/// Validates the shape of a draft's lines and returns its totals.
///
/// Checks run in order: line count, then per line sign, side and precision,
/// and range, then the entry total and the double-entry balance. All sums use
/// checked `Decimal` arithmetic.
///
/// # Errors
///
/// Returns the first rule violated.
pub fn validate_lines(lines: &[JournalLineDraft], currency: Currency) -> Result<EntryTotals, LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::InsufficientLines);
    }

    let mut totals = EntryTotals::default();

    for (line, draft) in lines.iter().enumerate() {
        if draft.debit < Decimal::ZERO || draft.credit < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount { line });
        }

        match (draft.debit > Decimal::ZERO, draft.credit > Decimal::ZERO) {
            (true, true) => return Err(LedgerError::BothSides { line }),
            (false, false) => return Err(LedgerError::ZeroAmount { line }),
            _ => {}
        }

        if !currency.fits_precision(draft.debit) || !currency.fits_precision(draft.credit) {
            return Err(LedgerError::PrecisionExceeded {
                line,
                minor_units: currency.minor_units(),
            });
        }

        if !fits_storage(draft.debit) || !fits_storage(draft.credit) {
            return Err(LedgerError::AmountOutOfRange { line });
        }

        totals.debit = checked_total(totals.debit, draft.debit)?;
        totals.credit = checked_total(totals.credit, draft.credit)?;
    }

    if !totals.is_balanced() {
        return Err(LedgerError::Unbalanced {
            debit: currency.normalize(totals.debit),
            credit: currency.normalize(totals.credit),
        });
    }

    Ok(totals)
}

fn checked_total(sum: Decimal, amount: Decimal) -> Result<Decimal, LedgerError> {
    sum.checked_add(amount)
        .filter(|total| fits_storage(*total))
        .ok_or(LedgerError::TotalOutOfRange)
}

/// Validates that every referenced account was found in the active company.
///
/// `accounts` must only contain accounts owned by the active company; an id
/// missing from the map is therefore either nonexistent or foreign.
///
/// # Errors
///
/// Returns `UnknownAccount` for the first missing id, or `AccountInactive`
/// when `require_active` is set and the account is deactivated.
pub fn validate_accounts(
    lines: &[JournalLineDraft],
    accounts: &HashMap<AccountId, Account>,
    require_active: bool,
) -> Result<(), LedgerError> {
    for line in lines {
        let account = accounts
            .get(&line.account_id)
            .ok_or(LedgerError::UnknownAccount(line.account_id))?;
        if require_active && !account.is_active {
            return Err(LedgerError::AccountInactive(account.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_shared::types::CompanyId;

    use crate::ledger::types::AccountType;

    fn account(is_active: bool) -> Account {
        Account {
            id: AccountId::new(),
            company_id: CompanyId::new(),
            code: "1200".to_string(),
            name: "Accounts Receivable".to_string(),
            account_type: AccountType::Asset,
            is_active,
            balance: Decimal::ZERO,
            version: 0,
        }
    }

    #[test]
    fn test_balanced_lines() {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), dec!(150.00)),
            JournalLineDraft::credit(AccountId::new(), dec!(150.00)),
        ];
        let totals = validate_lines(&lines, Currency::Usd).unwrap();
        assert_eq!(totals.debit, dec!(150.00));
        assert!(totals.is_balanced());
    }

    #[test]
    fn test_unbalanced_lines() {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), dec!(150.00)),
            JournalLineDraft::credit(AccountId::new(), dec!(140.00)),
        ];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::Unbalanced { debit, credit }) if debit == dec!(150.00) && credit == dec!(140.00)
        ));
    }

    #[test]
    fn test_single_line() {
        let lines = vec![JournalLineDraft::debit(AccountId::new(), dec!(1))];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::InsufficientLines)
        ));
    }

    #[test]
    fn test_line_with_both_sides() {
        let mut both = JournalLineDraft::debit(AccountId::new(), dec!(10));
        both.credit = dec!(10);
        let lines = vec![JournalLineDraft::credit(AccountId::new(), dec!(10)), both];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::BothSides { line: 1 })
        ));
    }

    #[test]
    fn test_line_with_neither_side() {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), dec!(0)),
            JournalLineDraft::credit(AccountId::new(), dec!(10)),
        ];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::ZeroAmount { line: 0 })
        ));
    }

    #[test]
    fn test_negative_amount() {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), dec!(-10)),
            JournalLineDraft::credit(AccountId::new(), dec!(-10)),
        ];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::NegativeAmount { line: 0 })
        ));
    }

    #[test]
    fn test_precision_follows_currency() {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), dec!(10.5)),
            JournalLineDraft::credit(AccountId::new(), dec!(10.5)),
        ];
        assert!(validate_lines(&lines, Currency::Usd).is_ok());
        assert!(matches!(
            validate_lines(&lines, Currency::Jpy),
            Err(LedgerError::PrecisionExceeded { line: 0, minor_units: 0 })
        ));
    }

    #[test]
    fn test_oversized_amounts_are_rejected_without_overflow() {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), Decimal::MAX),
            JournalLineDraft::debit(AccountId::new(), dec!(1)),
            JournalLineDraft::credit(AccountId::new(), dec!(1)),
        ];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::AmountOutOfRange { line: 0 })
        ));

        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), dec!(9000000000000000)),
            JournalLineDraft::debit(AccountId::new(), dec!(9000000000000000)),
            JournalLineDraft::credit(AccountId::new(), dec!(9000000000000000)),
            JournalLineDraft::credit(AccountId::new(), dec!(9000000000000000)),
        ];
        assert!(matches!(
            validate_lines(&lines, Currency::Usd),
            Err(LedgerError::TotalOutOfRange)
        ));
    }

    #[test]
    fn test_unknown_and_inactive_accounts() {
        let active = account(true);
        let inactive = account(false);
        let accounts: HashMap<_, _> = [(active.id, active.clone()), (inactive.id, inactive.clone())]
            .into_iter()
            .collect();

        let foreign = AccountId::new();
        let lines = vec![
            JournalLineDraft::debit(active.id, dec!(5)),
            JournalLineDraft::credit(foreign, dec!(5)),
        ];
        assert!(matches!(
            validate_accounts(&lines, &accounts, true),
            Err(LedgerError::UnknownAccount(id)) if id == foreign
        ));

        let lines = vec![
            JournalLineDraft::debit(active.id, dec!(5)),
            JournalLineDraft::credit(inactive.id, dec!(5)),
        ];
        assert!(matches!(
            validate_accounts(&lines, &accounts, true),
            Err(LedgerError::AccountInactive(_))
        ));
        assert!(validate_accounts(&lines, &accounts, false).is_ok());
    }
}
