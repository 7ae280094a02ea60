//! Property-based tests for journal line validation.

use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::{AccountId, Currency};

use super::error::LedgerError;
use super::types::JournalLineDraft;
use super::validation::validate_lines;

/// Strategy to generate positive cent amounts (0.01 to 1,000,000.00).
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Splits `total` into `parts` positive cent amounts summing exactly to it.
fn split(total: Decimal, parts: usize) -> Vec<Decimal> {
    let cents = (total * Decimal::ONE_HUNDRED).trunc();
    let parts_dec = Decimal::from(parts);
    let share = (cents / parts_dec).trunc();
    let mut amounts = vec![share / Decimal::ONE_HUNDRED; parts];
    if let Some(last) = amounts.last_mut() {
        *last = (cents - share * (parts_dec - Decimal::ONE)) / Decimal::ONE_HUNDRED;
    }
    amounts
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Balanced drafts validate, and the totals equal the generated amount.
    #[test]
    fn prop_balanced_drafts_validate(
        total in (100i64..100_000_000i64).prop_map(|c| Decimal::new(c, 2)),
        debit_parts in 1usize..5,
        credit_parts in 1usize..5,
    ) {
        let mut lines: Vec<JournalLineDraft> = split(total, debit_parts)
            .into_iter()
            .map(|a| JournalLineDraft::debit(AccountId::new(), a))
            .collect();
        lines.extend(
            split(total, credit_parts)
                .into_iter()
                .map(|a| JournalLineDraft::credit(AccountId::new(), a)),
        );
        prop_assume!(lines.iter().all(|l| l.debit > Decimal::ZERO || l.credit > Decimal::ZERO));

        let totals = validate_lines(&lines, Currency::Usd).unwrap();
        prop_assert_eq!(totals.debit, total);
        prop_assert_eq!(totals.credit, total);
    }

    /// Any difference between the sides is reported as `Unbalanced`.
    #[test]
    fn prop_unbalanced_drafts_rejected(
        debit in positive_amount(),
        credit in positive_amount(),
    ) {
        prop_assume!(debit != credit);
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), debit),
            JournalLineDraft::credit(AccountId::new(), credit),
        ];
        let result = validate_lines(&lines, Currency::Usd);
        prop_assert!(
            matches!(result, Err(LedgerError::Unbalanced { .. })),
            "expected Unbalanced, got {:?}",
            result
        );
    }

    /// Negative amounts are rejected before the balance is checked.
    #[test]
    fn prop_negative_amount_rejected(amount in positive_amount()) {
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), -amount),
            JournalLineDraft::credit(AccountId::new(), -amount),
        ];
        let result = validate_lines(&lines, Currency::Usd);
        prop_assert!(
            matches!(result, Err(LedgerError::NegativeAmount { line: 0 })),
            "expected NegativeAmount on line 0, got {:?}",
            result
        );
    }

    /// Sub-cent amounts never validate for a two-decimal currency.
    #[test]
    fn prop_sub_cent_amount_rejected(mills in 1i64..1_000_000i64) {
        let amount = Decimal::new(mills * 10 + 5, 3);
        let lines = vec![
            JournalLineDraft::debit(AccountId::new(), amount),
            JournalLineDraft::credit(AccountId::new(), amount),
        ];
        let result = validate_lines(&lines, Currency::Usd);
        prop_assert!(
            matches!(result, Err(LedgerError::PrecisionExceeded { .. })),
            "expected PrecisionExceeded, got {:?}",
            result
        );
    }
}
