//! End-to-end dispatcher tests against the in-memory store.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tally_shared::ErrorKind;
use tally_shared::types::{
    AccountId, AllocationId, CompanyId, Currency, CustomerId, InvoiceId, JournalEntryId, PaymentId, UserId,
};

use super::{CommandRequest, DispatchOutcome, Dispatcher};
use crate::audit::{AuditOutcome, AuditPolicy};
use crate::authz::Role;
use crate::billing::{InvoiceStatus, PaymentStatus};
use crate::commands::default_registry;
use crate::idempotency::{BeginOutcome, IdempotencyKey, IdempotencyPolicy, IdempotencyScope, fingerprint};
use crate::ledger::{AccountType, JournalStatus};
use crate::memory::MemoryStore;
use crate::store::{CommandStore, IdempotencyLedger, StoreError, UnitOfWork};
use crate::tenant::TenantContext;

struct Fixture {
    store: Arc<MemoryStore>,
    dispatcher: Arc<Dispatcher<MemoryStore>>,
    clock: Arc<Mutex<DateTime<Utc>>>,
    policy: IdempotencyPolicy,
    company: CompanyId,
    user: UserId,
    customer: CustomerId,
    receivable: AccountId,
    revenue: AccountId,
    cash: AccountId,
}

fn fast_policy() -> IdempotencyPolicy {
    IdempotencyPolicy {
        wait_attempts: 3,
        wait_interval: Duration::from_millis(5),
        ..IdempotencyPolicy::default()
    }
}

fn fixture() -> Fixture {
    fixture_with(fast_policy())
}

fn fixture_with(policy: IdempotencyPolicy) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let company = store.add_company("acme", Currency::Usd, Some(42));
    let user = UserId::new();
    store.add_member(company, user, Role::Accountant);
    let customer = store.add_customer(company, "Wayne Enterprises");
    let receivable = store.add_account(company, "1200", "Accounts Receivable", AccountType::Asset);
    let revenue = store.add_account(company, "4000", "Sales Revenue", AccountType::Revenue);
    let cash = store.add_account(company, "1000", "Cash", AccountType::Asset);

    let clock = Arc::new(Mutex::new(Utc::now()));
    let reader = Arc::clone(&clock);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        default_registry(),
        policy,
        AuditPolicy::new(["card_number"]),
    )
    .with_clock(move || *reader.lock().unwrap());

    Fixture {
        store,
        dispatcher: Arc::new(dispatcher),
        clock,
        policy,
        company,
        user,
        customer,
        receivable,
        revenue,
        cash,
    }
}

fn id<T>(body: &Value) -> T
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    body["id"].as_str().unwrap().parse().unwrap()
}

impl Fixture {
    fn request(&self, command: &str, key: &str, params: Value) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            params,
            actor_id: self.user,
            tenant: "acme".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    fn advance(&self, delta: TimeDelta) {
        let mut now = self.clock.lock().unwrap();
        *now += delta;
    }

    async fn run(&self, command: &str, key: &str, params: Value) -> DispatchOutcome {
        self.dispatcher.dispatch(self.request(command, key, params)).await
    }

    async fn ok(&self, command: &str, key: &str, params: Value) -> Value {
        let outcome = self.run(command, key, params).await;
        assert!(outcome.is_success(), "{command} failed: {}", outcome.body());
        outcome.body()
    }

    fn invoice_params(&self, number: &str, total: &str, due: &str) -> Value {
        json!({
            "customer_id": self.customer,
            "number": number,
            "issue_date": "2026-01-01",
            "due_date": due,
            "lines": [{"description": "Consulting", "quantity": "1", "unit_price": total}],
            "posting": {
                "receivable_account_id": self.receivable,
                "revenue_account_id": self.revenue,
            },
        })
    }

    async fn create_invoice(&self, number: &str, total: &str, due: &str) -> InvoiceId {
        let params = self.invoice_params(number, total, due);
        id(&self.ok("invoice.create", &format!("inv-{number}"), params).await)
    }

    async fn create_payment(&self, key: &str, amount: &str) -> PaymentId {
        let params = json!({
            "customer_id": self.customer,
            "payment_date": "2026-01-15",
            "amount": amount,
            "method": "bank_transfer",
            "posting": {
                "deposit_account_id": self.cash,
                "receivable_account_id": self.receivable,
            },
        });
        id(&self.ok("payment.create", key, params).await)
    }
}

#[tokio::test]
async fn test_replay_returns_identical_bytes_and_one_invoice() {
    let fx = fixture();
    let params = fx.invoice_params("INV-1", "100.00", "2026-01-31");

    let first = fx.run("invoice.create", "k-1", params.clone()).await;
    let second = fx.run("invoice.create", "k-1", params).await;

    assert!(matches!(first, DispatchOutcome::Executed(_)));
    assert!(matches!(second, DispatchOutcome::Replayed(_)));
    assert_eq!(
        serde_json::to_string(&first.body()).unwrap(),
        serde_json::to_string(&second.body()).unwrap()
    );
    assert_eq!(fx.store.invoice_count(), 1);
    assert_eq!(fx.store.entry_count(), 1);

    let outcomes: Vec<AuditOutcome> = fx.store.audit_entries().iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, vec![AuditOutcome::Succeeded, AuditOutcome::Replayed]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_duplicates_execute_once() {
    let fx = fixture();
    let params = fx.invoice_params("INV-RACE", "10.00", "2026-01-31");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&fx.dispatcher);
            let request = fx.request("invoice.create", "race", params.clone());
            tokio::spawn(async move { dispatcher.dispatch(request).await })
        })
        .collect();

    let mut bodies = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        match outcome.error_kind() {
            None => bodies.push(serde_json::to_string(&outcome.body()).unwrap()),
            Some(kind) => assert_eq!(kind, ErrorKind::Conflict),
        }
    }

    assert_eq!(fx.store.invoice_count(), 1);
    assert!(!bodies.is_empty());
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_same_key_with_different_params_conflicts() {
    let fx = fixture();
    fx.ok("invoice.create", "k-1", fx.invoice_params("INV-1", "100.00", "2026-01-31"))
        .await;

    let outcome = fx
        .run("invoice.create", "k-1", fx.invoice_params("INV-2", "100.00", "2026-01-31"))
        .await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Conflict));
    assert_eq!(outcome.status(), 409);
    assert_eq!(fx.store.invoice_count(), 1);
}

#[tokio::test]
async fn test_auto_allocate_then_reverse_scenario() {
    let fx = fixture();
    let invoice = fx.create_invoice("INV-1", "100.00", "2026-01-31").await;
    let payment = fx.create_payment("pay-1", "60.00").await;

    let allocated = fx
        .ok("payment.allocate.auto", "auto-1", json!({ "payment_id": payment }))
        .await;
    assert_eq!(allocated["allocated"], "60.00");
    assert_eq!(allocated["unallocated"], "0.00");
    assert_eq!(allocated["invoices"][0]["paid"], "60.00");
    assert_eq!(allocated["invoices"][0]["balance_due"], "40.00");

    let stored = fx.store.invoice(invoice);
    assert_eq!(stored.paid, dec!(60.00));
    assert_eq!(stored.balance_due(), dec!(40.00));
    assert_eq!(stored.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(fx.store.payment(payment).allocated, dec!(60.00));

    let allocation_id: AllocationId = allocated["allocations"][0]["id"].as_str().unwrap().parse().unwrap();
    let reversed = fx
        .ok(
            "payment.allocation.reverse",
            "rev-1",
            json!({ "allocation_id": allocation_id }),
        )
        .await;
    assert_eq!(reversed["amount"], "60.00");
    assert_eq!(reversed["invoice"]["paid"], "0.00");

    let stored = fx.store.invoice(invoice);
    assert_eq!(stored.paid, dec!(0));
    assert_eq!(stored.status, InvoiceStatus::Open);
    assert_eq!(fx.store.payment(payment).allocated, dec!(0));
    assert!(!fx.store.allocations_of(payment)[0].is_active());

    let actions: Vec<String> = fx.store.audit_entries().into_iter().map(|e| e.action).collect();
    assert!(actions.contains(&"payment.allocation.reversed".to_string()));

    let again = fx
        .run(
            "payment.allocation.reverse",
            "rev-2",
            json!({ "allocation_id": allocation_id }),
        )
        .await;
    assert_eq!(again.error_kind(), Some(ErrorKind::AlreadyReversed));
}

#[tokio::test]
async fn test_manual_allocation_round_trip_is_exact() {
    let fx = fixture();
    let a = fx.create_invoice("INV-A", "100.00", "2026-01-10").await;
    let b = fx.create_invoice("INV-B", "50.00", "2026-01-20").await;
    let payment = fx.create_payment("pay-1", "99.99").await;

    let body = fx
        .ok(
            "payment.allocate",
            "alloc-1",
            json!({
                "payment_id": payment,
                "allocations": [
                    {"invoice_id": a, "amount": "33.33"},
                    {"invoice_id": b, "amount": "16.67"},
                ],
            }),
        )
        .await;
    assert_eq!(body["allocated"], "50.00");
    assert_eq!(body["unallocated"], "49.99");

    for allocation in fx.store.allocations_of(payment) {
        fx.ok(
            "payment.allocation.reverse",
            &format!("rev-{}", allocation.id),
            json!({ "allocation_id": allocation.id }),
        )
        .await;
    }

    assert_eq!(fx.store.invoice(a).paid, dec!(0));
    assert_eq!(fx.store.invoice(b).paid, dec!(0));
    assert_eq!(fx.store.payment(payment).allocated, dec!(0));
    assert_eq!(fx.store.payment(payment).unallocated(), dec!(99.99));
}

#[tokio::test]
async fn test_over_allocation_rejects_whole_batch() {
    let fx = fixture();
    let a = fx.create_invoice("INV-A", "100.00", "2026-01-10").await;
    let b = fx.create_invoice("INV-B", "100.00", "2026-01-20").await;
    let payment = fx.create_payment("pay-1", "60.00").await;

    let outcome = fx
        .run(
            "payment.allocate",
            "alloc-1",
            json!({
                "payment_id": payment,
                "allocations": [
                    {"invoice_id": a, "amount": "50.00"},
                    {"invoice_id": b, "amount": "20.00"},
                ],
            }),
        )
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::InsufficientBalance));
    assert_eq!(outcome.status(), 422);
    assert_eq!(fx.store.invoice(a).paid, dec!(0));
    assert!(fx.store.allocations_of(payment).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_never_over_allocate() {
    let fx = fixture();
    let mut invoices = Vec::new();
    for n in 0..6 {
        invoices.push(fx.create_invoice(&format!("INV-{n}"), "50.00", "2026-01-31").await);
    }
    let payment = fx.create_payment("pay-1", "100.00").await;

    let handles: Vec<_> = invoices
        .iter()
        .enumerate()
        .map(|(n, invoice)| {
            let dispatcher = Arc::clone(&fx.dispatcher);
            let request = fx.request(
                "payment.allocate",
                &format!("alloc-{n}"),
                json!({
                    "payment_id": payment,
                    "allocations": [{"invoice_id": invoice, "amount": "25.00"}],
                }),
            );
            tokio::spawn(async move { dispatcher.dispatch(request).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        match outcome.error_kind() {
            None => succeeded += 1,
            Some(kind) => assert_eq!(kind, ErrorKind::InsufficientBalance),
        }
    }

    assert_eq!(succeeded, 4);
    let stored = fx.store.payment(payment);
    assert_eq!(stored.allocated, dec!(100.00));
    assert_eq!(
        fx.store.allocations_of(payment).iter().map(|a| a.amount).sum::<rust_decimal::Decimal>(),
        dec!(100.00)
    );
}

#[tokio::test]
async fn test_reverse_payment_releases_everything_and_voids_posting() {
    let fx = fixture();
    let a = fx.create_invoice("INV-A", "30.00", "2026-01-10").await;
    let b = fx.create_invoice("INV-B", "50.00", "2026-01-20").await;
    let payment = fx.create_payment("pay-1", "70.00").await;
    fx.ok("payment.allocate.auto", "auto-1", json!({ "payment_id": payment }))
        .await;
    assert_eq!(fx.store.account(fx.cash).balance, dec!(70.00));

    let body = fx
        .ok(
            "payment.reverse",
            "reverse-1",
            json!({ "payment_id": payment, "reason": "Bounced" }),
        )
        .await;
    assert_eq!(body["status"], "reversed");
    assert_eq!(body["reversed_allocations"].as_array().unwrap().len(), 2);

    let stored = fx.store.payment(payment);
    assert_eq!(stored.status, PaymentStatus::Reversed);
    assert_eq!(stored.allocated, dec!(0));
    assert_eq!(fx.store.invoice(a).paid, dec!(0));
    assert_eq!(fx.store.invoice(b).paid, dec!(0));

    let posting = fx.store.entry(stored.journal_entry_id.unwrap());
    assert_eq!(posting.status, JournalStatus::Voided);
    assert_eq!(fx.store.account(fx.cash).balance, dec!(0));

    let events: Vec<String> = fx
        .store
        .audit_entries()
        .into_iter()
        .map(|e| e.action)
        .filter(|a| a.ends_with(".reversed"))
        .collect();
    assert_eq!(
        events,
        vec!["payment.allocation.reversed", "payment.allocation.reversed", "payment.reversed"]
    );

    let again = fx
        .run("payment.reverse", "reverse-2", json!({ "payment_id": payment }))
        .await;
    assert_eq!(again.error_kind(), Some(ErrorKind::AlreadyReversed));
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn test_journal_post_scenarios() {
    let fx = fixture();

    let posted = fx
        .ok(
            "journal.post",
            "je-1",
            json!({
                "entry_date": "2026-02-01",
                "description": "Cash sale",
                "lines": [
                    {"account_id": fx.receivable, "debit": "150.00"},
                    {"account_id": fx.revenue, "credit": "150.00"},
                ],
            }),
        )
        .await;
    assert_eq!(posted["total_debit"], "150.00");
    assert_eq!(posted["total_credit"], "150.00");
    assert_eq!(fx.store.account(fx.receivable).balance, dec!(150.00));
    assert_eq!(fx.store.account(fx.revenue).balance, dec!(150.00));

    let rejected = fx
        .run(
            "journal.post",
            "je-2",
            json!({
                "entry_date": "2026-02-01",
                "description": "Typo",
                "lines": [
                    {"account_id": fx.receivable, "debit": "150.00"},
                    {"account_id": fx.revenue, "credit": "140.00"},
                ],
            }),
        )
        .await;
    assert_eq!(rejected.error_kind(), Some(ErrorKind::Unbalanced));
    assert_eq!(rejected.body()["code"], "UNBALANCED");
    assert_eq!(fx.store.entry_count(), 1);
    assert_eq!(fx.store.account(fx.receivable).balance, dec!(150.00));
}

#[tokio::test]
async fn test_journal_void_restores_balances() {
    let fx = fixture();
    let posted = fx
        .ok(
            "journal.post",
            "je-1",
            json!({
                "entry_date": "2026-02-01",
                "description": "Sale",
                "lines": [
                    {"account_id": fx.receivable, "debit": "80.00"},
                    {"account_id": fx.revenue, "credit": "80.00"},
                ],
            }),
        )
        .await;
    let entry: JournalEntryId = id(&posted);

    let voided = fx
        .ok("journal.void", "void-1", json!({ "entry_id": entry, "reason": "Duplicate" }))
        .await;
    let reversal: JournalEntryId = voided["reversal_entry_id"].as_str().unwrap().parse().unwrap();

    assert_eq!(fx.store.entry(entry).status, JournalStatus::Voided);
    assert_eq!(fx.store.entry(entry).voided_by, Some(reversal));
    assert_eq!(fx.store.account(fx.receivable).balance, dec!(0));
    assert_eq!(fx.store.account(fx.revenue).balance, dec!(0));

    let twice = fx
        .run("journal.void", "void-2", json!({ "entry_id": entry, "reason": "Again" }))
        .await;
    assert_eq!(twice.error_kind(), Some(ErrorKind::AlreadyReversed));
}

#[tokio::test]
async fn test_foreign_account_is_unknown() {
    let fx = fixture();
    let globex = fx.store.add_company("globex", Currency::Usd, None);
    let foreign = fx.store.add_account(globex, "1000", "Cash", AccountType::Asset);

    let outcome = fx
        .run(
            "journal.post",
            "je-1",
            json!({
                "entry_date": "2026-02-01",
                "description": "Sneaky",
                "lines": [
                    {"account_id": foreign, "debit": "10.00"},
                    {"account_id": fx.revenue, "credit": "10.00"},
                ],
            }),
        )
        .await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownAccount));
    assert_eq!(fx.store.entry_count(), 0);
}

#[tokio::test]
async fn test_cross_tenant_access_is_rejected_as_not_found() {
    let fx = fixture();
    let invoice = fx.create_invoice("INV-1", "100.00", "2026-01-31").await;

    let globex = fx.store.add_company("globex", Currency::Usd, None);
    fx.store.add_member(globex, fx.user, Role::Owner);
    let globex_customer = fx.store.add_customer(globex, "Globex Customer");

    let mut request = fx.request(
        "payment.create",
        "g-pay",
        json!({
            "customer_id": globex_customer,
            "payment_date": "2026-01-15",
            "amount": "40.00",
        }),
    );
    request.tenant = "globex".to_string();
    let payment: PaymentId = id(&fx.dispatcher.dispatch(request).await.body());

    let mut request = fx.request(
        "payment.allocate",
        "g-alloc",
        json!({
            "payment_id": payment,
            "allocations": [{"invoice_id": invoice, "amount": "40.00"}],
        }),
    );
    request.tenant = "globex".to_string();
    let outcome = fx.dispatcher.dispatch(request).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::TenantMismatch));
    let body = outcome.body();
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(!body["message"].as_str().unwrap().contains(&invoice.to_string()));
    assert_eq!(fx.store.invoice(invoice).paid, dec!(0));
    assert_eq!(fx.store.payment(payment).allocated, dec!(0));

    let mut request = fx.request("payment.create", "g-pay-2", json!({
        "customer_id": fx.customer,
        "payment_date": "2026-01-15",
        "amount": "40.00",
    }));
    request.tenant = "globex".to_string();
    let outcome = fx.dispatcher.dispatch(request).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::TenantMismatch));
}

#[tokio::test]
async fn test_tenant_resolution() {
    let fx = fixture();
    let params = fx.invoice_params("INV-1", "10.00", "2026-01-31");

    let mut by_legacy = fx.request("invoice.create", "k-legacy", params.clone());
    by_legacy.tenant = "42".to_string();
    assert!(fx.dispatcher.dispatch(by_legacy).await.is_success());

    let mut by_uuid = fx.request("invoice.create", "k-legacy", params.clone());
    by_uuid.tenant = fx.company.to_string();
    assert!(matches!(
        fx.dispatcher.dispatch(by_uuid).await,
        DispatchOutcome::Replayed(_)
    ));

    let mut unknown = fx.request("invoice.create", "k-x", params.clone());
    unknown.tenant = "initech".to_string();
    assert_eq!(
        fx.dispatcher.dispatch(unknown).await.error_kind(),
        Some(ErrorKind::NotFound)
    );

    fx.store.deactivate_company(fx.company);
    let inactive = fx.request("invoice.create", "k-y", params);
    assert_eq!(
        fx.dispatcher.dispatch(inactive).await.error_kind(),
        Some(ErrorKind::NotFound)
    );

    let outcomes: Vec<AuditOutcome> = fx.store.audit_entries().iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, vec![AuditOutcome::Succeeded, AuditOutcome::Replayed]);
}

#[tokio::test]
async fn test_authorization() {
    let fx = fixture();
    let viewer = UserId::new();
    fx.store.add_member(fx.company, viewer, Role::Viewer);

    let mut request = fx.request("invoice.create", "k-1", fx.invoice_params("INV-1", "10.00", "2026-01-31"));
    request.actor_id = viewer;
    let outcome = fx.dispatcher.dispatch(request).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Forbidden));
    assert_eq!(outcome.status(), 403);

    let mut request = fx.request("invoice.create", "k-2", fx.invoice_params("INV-1", "10.00", "2026-01-31"));
    request.actor_id = UserId::new();
    assert_eq!(
        fx.dispatcher.dispatch(request).await.error_kind(),
        Some(ErrorKind::Forbidden)
    );
    assert_eq!(fx.store.invoice_count(), 0);
}

#[tokio::test]
async fn test_unknown_command_is_audited() {
    let fx = fixture();
    let outcome = fx.run("invoice.delete", "k-1", json!({})).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::CommandNotFound));
    assert_eq!(outcome.status(), 404);

    let entries = fx.store.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, AuditOutcome::Failed);
    assert_eq!(entries[0].error.as_ref().unwrap().code, "COMMAND_NOT_FOUND");
}

#[tokio::test]
async fn test_validation_reports_fields() {
    let fx = fixture();

    let mut params = fx.invoice_params("INV-1", "10.00", "2026-01-31");
    params["lines"][0]["description"] = json!("");
    let outcome = fx.run("invoice.create", "k-1", params).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
    assert!(outcome.body()["field_errors"]["lines[0].description"].is_array());

    let mut params = fx.invoice_params("INV-1", "10.00", "2026-01-31");
    params["lines"][0]["quantity"] = json!("0");
    let outcome = fx.run("invoice.create", "k-2", params).await;
    assert!(outcome.body()["field_errors"]["lines[0].quantity"].is_array());

    let outcome = fx.run("invoice.create", "", fx.invoice_params("INV-1", "10.00", "2026-01-31")).await;
    assert!(outcome.body()["field_errors"]["idempotency_key"].is_array());

    let outcome = fx.run("payment.allocate", "k-3", json!({ "payment_id": "nope" })).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
}

#[tokio::test]
async fn test_oversized_amounts_fail_cleanly_and_keys_stay_usable() {
    let fx = fixture();
    let max = "79228162514264337593543950335";

    let journal = json!({
        "entry_date": "2026-02-01",
        "description": "Overflow",
        "lines": [
            {"account_id": fx.receivable, "debit": max},
            {"account_id": fx.receivable, "debit": "1"},
            {"account_id": fx.revenue, "credit": "1"},
        ],
    });
    for _ in 0..2 {
        let outcome = fx.run("journal.post", "je-big", journal.clone()).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
        assert!(outcome.body()["field_errors"]["lines[0]"].is_array());
    }
    assert_eq!(fx.store.entry_count(), 0);
    assert_eq!(fx.store.account(fx.receivable).balance, dec!(0));

    let mut invoice = fx.invoice_params("INV-BIG", "10.00", "2026-01-31");
    invoice["lines"][0]["quantity"] = json!(max);
    let outcome = fx.run("invoice.create", "inv-big", invoice).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
    assert!(outcome.body()["field_errors"]["lines[0].quantity"].is_array());

    let mut invoice = fx.invoice_params("INV-BIG", "10.00", "2026-01-31");
    invoice["lines"][0]["quantity"] = json!("1.00001");
    let outcome = fx.run("invoice.create", "inv-precise", invoice).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
    assert!(outcome.body()["field_errors"]["lines[0].quantity"].is_array());
    assert_eq!(fx.store.invoice_count(), 0);

    let invoice = fx.create_invoice("INV-1", "100.00", "2026-01-31").await;
    let payment = fx.create_payment("pay-1", "60.00").await;
    let allocate = json!({
        "payment_id": payment,
        "allocations": [{"invoice_id": invoice, "amount": max}],
    });
    let outcome = fx.run("payment.allocate", "alloc-big", allocate.clone()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
    assert!(outcome.body()["field_errors"]["allocations[0].amount"].is_array());
    let retried = fx.run("payment.allocate", "alloc-big", allocate).await;
    assert_eq!(retried.error_kind(), Some(ErrorKind::ValidationError));

    let failed = fx
        .store
        .audit_entries()
        .iter()
        .filter(|e| e.outcome == AuditOutcome::Failed)
        .count();
    assert_eq!(failed, 6);
}

#[tokio::test]
async fn test_duplicate_invoice_number() {
    let fx = fixture();
    fx.create_invoice("INV-1", "10.00", "2026-01-31").await;
    let outcome = fx
        .run("invoice.create", "other-key", fx.invoice_params("INV-1", "10.00", "2026-01-31"))
        .await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
    assert!(outcome.body()["field_errors"]["number"].is_array());
    assert_eq!(fx.store.invoice_count(), 1);
    assert_eq!(fx.store.entry_count(), 1);
}

#[tokio::test]
async fn test_failed_key_is_retryable_by_default() {
    let fx = fixture();
    let params = fx.invoice_params("INV-1", "10.00", "2026-01-31");

    let viewer = UserId::new();
    fx.store.add_member(fx.company, viewer, Role::Viewer);
    let mut request = fx.request("invoice.create", "k-1", params.clone());
    request.actor_id = viewer;
    assert!(!fx.dispatcher.dispatch(request).await.is_success());

    fx.store.add_member(fx.company, viewer, Role::Accountant);
    let mut request = fx.request("invoice.create", "k-1", params);
    request.actor_id = viewer;
    assert!(matches!(
        fx.dispatcher.dispatch(request).await,
        DispatchOutcome::Executed(_)
    ));
}

#[tokio::test]
async fn test_failure_replay_policy() {
    let fx = fixture_with(IdempotencyPolicy {
        retry_failed: false,
        ..fast_policy()
    });
    let params = json!({
        "entry_date": "2026-02-01",
        "description": "Off",
        "lines": [
            {"account_id": fx.receivable, "debit": "150.00"},
            {"account_id": fx.revenue, "credit": "140.00"},
        ],
    });

    let first = fx.run("journal.post", "je-1", params.clone()).await;
    let second = fx.run("journal.post", "je-1", params).await;

    assert_eq!(second.error_kind(), Some(ErrorKind::Unbalanced));
    assert_eq!(first.body(), second.body());
    let entries = fx.store.audit_entries();
    assert_eq!(entries[1].outcome, AuditOutcome::Replayed);
}

#[tokio::test]
async fn test_audit_failure_does_not_undo_command() {
    let fx = fixture();
    fx.store.set_audit_down(true);

    let invoice = fx.create_invoice("INV-1", "100.00", "2026-01-31").await;

    assert_eq!(fx.store.invoice(invoice).total, dec!(100.00));
    assert!(fx.store.audit_entries().is_empty());
}

#[tokio::test]
async fn test_audit_params_are_sanitised() {
    let fx = fixture();
    let mut params = fx.invoice_params("INV-1", "10.00", "2026-01-31");
    params["memo"] = json!("card_number is redacted below");
    let outcome = fx.run("invoice.create", "k-1", params.clone()).await;
    assert!(outcome.is_success());

    let mut with_secret = json!({ "payment_id": PaymentId::new(), "card_number": "4111" });
    let outcome = fx.run("payment.allocate.auto", "k-2", with_secret.clone()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));

    let entries = fx.store.audit_entries();
    assert_eq!(entries[1].params["card_number"], "[REDACTED]");
    with_secret["card_number"] = json!("[REDACTED]");
    assert_eq!(entries[1].params, with_secret);
}

#[tokio::test]
async fn test_busy_key_reports_conflict() {
    let fx = fixture();
    let params = fx.invoice_params("INV-1", "10.00", "2026-01-31");
    let scope = IdempotencyScope::new(fx.company, "invoice.create", IdempotencyKey::parse("k-1").unwrap());
    let now = *fx.clock.lock().unwrap();
    let held = fx
        .store
        .begin(&scope, &fingerprint("invoice.create", &params), &fx.policy, now)
        .await
        .unwrap();
    assert!(matches!(held, BeginOutcome::Fresh(_)));

    let outcome = fx.run("invoice.create", "k-1", params).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Conflict));
    assert_eq!(fx.store.invoice_count(), 0);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_stale_holder_fenced() {
    let fx = fixture();
    let params = fx.invoice_params("INV-1", "10.00", "2026-01-31");
    let scope = IdempotencyScope::new(fx.company, "invoice.create", IdempotencyKey::parse("k-1").unwrap());
    let now = *fx.clock.lock().unwrap();
    let BeginOutcome::Fresh(stale) = fx
        .store
        .begin(&scope, &fingerprint("invoice.create", &params), &fx.policy, now)
        .await
        .unwrap()
    else {
        panic!("expected a fresh lease");
    };

    fx.advance(fx.policy.lease_timeout + TimeDelta::seconds(1));
    let outcome = fx.run("invoice.create", "k-1", params).await;
    assert!(matches!(outcome, DispatchOutcome::Executed(_)));
    assert_eq!(fx.store.record(&scope).unwrap().attempts, 2);

    let tenant = TenantContext::new(fx.company, "acme", Currency::Usd);
    let mut unit = fx.store.begin_unit(&tenant).await.unwrap();
    let result = unit.complete_idempotency(&stale, r#"{"id":"stale"}"#).await;
    assert!(matches!(result, Err(StoreError::LeaseLost { .. })));
    unit.rollback().await.unwrap();
    assert_eq!(fx.store.invoice_count(), 1);
}

#[tokio::test]
async fn test_purge_expired_records() {
    let fx = fixture();
    fx.ok("invoice.create", "k-1", fx.invoice_params("INV-1", "10.00", "2026-01-31"))
        .await;

    assert_eq!(fx.dispatcher.purge_expired().await.unwrap(), 0);
    fx.advance(fx.policy.retention + TimeDelta::seconds(1));
    assert_eq!(fx.dispatcher.purge_expired().await.unwrap(), 1);
}
