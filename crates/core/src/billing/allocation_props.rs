//! Property-based tests for allocation planning.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::{CompanyId, Currency, CustomerId, InvoiceId, UserId};

use super::allocation::{AllocationRequest, AutoAllocationStrategy, plan_auto, plan_manual};
use super::invoice::{Invoice, InvoiceStatus};
use super::payment::{Payment, PaymentDraft};

fn cents() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|c| Decimal::new(c, 2))
}

fn invoice(customer_id: CustomerId, total: Decimal, due_day: u32) -> Invoice {
    let now = Utc::now();
    Invoice {
        id: InvoiceId::new(),
        company_id: CompanyId::new(),
        customer_id,
        number: format!("INV-{due_day}"),
        issue_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        due_date: NaiveDate::from_ymd_opt(2026, 1, due_day).unwrap(),
        currency: Currency::Usd,
        total,
        paid: Decimal::ZERO,
        status: InvoiceStatus::Open,
        lines: Vec::new(),
        journal_entry_id: None,
        memo: None,
        created_by: UserId::new(),
        created_at: now,
        updated_at: now,
    }
}

fn payment(customer_id: CustomerId, amount: Decimal) -> Payment {
    PaymentDraft {
        customer_id,
        payment_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        amount,
        method: None,
        reference: None,
    }
    .build(CompanyId::new(), Currency::Usd, UserId::new(), Utc::now())
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The automatic plan never over-allocates the payment or any invoice.
    #[test]
    fn prop_auto_plan_respects_bounds(
        amount in cents(),
        totals in prop::collection::vec((cents(), 1u32..28), 0..8),
        newest_first in any::<bool>(),
    ) {
        let customer = CustomerId::new();
        let invoices: Vec<Invoice> = totals.iter().map(|(t, d)| invoice(customer, *t, *d)).collect();
        let by_id: HashMap<InvoiceId, Invoice> = invoices.iter().map(|i| (i.id, i.clone())).collect();
        let strategy = if newest_first {
            AutoAllocationStrategy::NewestDueFirst
        } else {
            AutoAllocationStrategy::OldestDueFirst
        };

        let pay = payment(customer, amount);
        let plan = plan_auto(&pay, invoices, strategy);

        let planned: Decimal = plan.iter().map(|p| p.amount).sum();
        let outstanding: Decimal = by_id.values().map(Invoice::balance_due).sum();
        prop_assert!(planned <= pay.unallocated());
        prop_assert_eq!(planned, pay.unallocated().min(outstanding));
        for p in &plan {
            prop_assert!(p.amount > Decimal::ZERO);
            prop_assert!(p.amount <= by_id[&p.invoice_id].balance_due());
        }
    }

    /// An accepted manual plan keeps every cumulative amount within bounds.
    #[test]
    fn prop_manual_plan_within_bounds(
        amount in cents(),
        invoice_totals in prop::collection::vec(cents(), 1..4),
        picks in prop::collection::vec((0usize..4, cents()), 1..6),
    ) {
        let customer = CustomerId::new();
        let invoices: Vec<Invoice> = invoice_totals.iter().map(|t| invoice(customer, *t, 10)).collect();
        let by_id: HashMap<InvoiceId, Invoice> = invoices.iter().map(|i| (i.id, i.clone())).collect();
        let requests: Vec<AllocationRequest> = picks
            .iter()
            .map(|(i, a)| AllocationRequest {
                invoice_id: invoices[i % invoices.len()].id,
                amount: *a,
            })
            .collect();

        let pay = payment(customer, amount);
        if let Ok(plan) = plan_manual(&pay, &by_id, &requests) {
            let planned: Decimal = plan.iter().map(|p| p.amount).sum();
            prop_assert!(planned <= pay.unallocated());

            let mut per_invoice: HashMap<InvoiceId, Decimal> = HashMap::new();
            for p in &plan {
                *per_invoice.entry(p.invoice_id).or_insert(Decimal::ZERO) += p.amount;
            }
            for (id, sum) in per_invoice {
                prop_assert!(sum <= by_id[&id].balance_due());
            }
        }
    }
}
