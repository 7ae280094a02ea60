//! In-memory implementation of the storage ports, for tests.
//!
//! Units of work are serialised by one async mutex, which stands in for the
//! row locks of the PostgreSQL store. Each unit works on a copy of the data
//! and publishes it on commit. Ownership is checked on every access exactly
//! like the SQL store does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tally_shared::ErrorBody;
use tally_shared::types::{
    AccountId, AllocationId, CompanyId, Currency, CustomerId, InvoiceId, JournalEntryId, PaymentId, UserId,
};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::audit::{AuditLogEntry, DomainEvent};
use crate::authz::Role;
use crate::billing::{Customer, Invoice, Payment, PaymentAllocation};
use crate::idempotency::{BeginOutcome, IdempotencyPolicy, IdempotencyRecord, IdempotencyScope, Lease};
use crate::ledger::{Account, AccountType, JournalEntry};
use crate::store::{
    AuditSink, BillingStore, CommandStore, IdempotencyLedger, LedgerStore, StoreError, TenantDirectory, UnitOfWork,
};
use crate::tenant::{Tenant, TenantCandidate, TenantContext, TenantError};

#[derive(Debug, Clone, Default)]
struct Data {
    companies: Vec<Tenant>,
    members: HashMap<(CompanyId, UserId), Role>,
    customers: HashMap<CustomerId, Customer>,
    accounts: HashMap<AccountId, Account>,
    entries: HashMap<JournalEntryId, JournalEntry>,
    invoices: HashMap<InvoiceId, Invoice>,
    payments: HashMap<PaymentId, Payment>,
    allocations: HashMap<AllocationId, PaymentAllocation>,
}

type RecordKey = (CompanyId, String, String);

fn record_key(scope: &IdempotencyScope) -> RecordKey {
    (scope.company_id, scope.command.clone(), scope.key.as_str().to_string())
}

/// Shared in-memory store.
#[derive(Default)]
pub(crate) struct MemoryStore {
    data: Arc<Mutex<Data>>,
    records: Arc<Mutex<HashMap<RecordKey, IdempotencyRecord>>>,
    audit: Mutex<Vec<AuditLogEntry>>,
    audit_down: AtomicBool,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_company(&self, slug: &str, currency: Currency, legacy_id: Option<i64>) -> CompanyId {
        let id = CompanyId::new();
        self.data.lock().unwrap().companies.push(Tenant {
            id,
            slug: slug.to_string(),
            name: slug.to_uppercase(),
            base_currency: currency,
            legacy_id,
            is_active: true,
        });
        id
    }

    pub(crate) fn deactivate_company(&self, id: CompanyId) {
        let mut data = self.data.lock().unwrap();
        if let Some(company) = data.companies.iter_mut().find(|c| c.id == id) {
            company.is_active = false;
        }
    }

    pub(crate) fn add_member(&self, company_id: CompanyId, user: UserId, role: Role) {
        self.data.lock().unwrap().members.insert((company_id, user), role);
    }

    pub(crate) fn add_customer(&self, company_id: CompanyId, name: &str) -> CustomerId {
        let id = CustomerId::new();
        self.data.lock().unwrap().customers.insert(
            id,
            Customer {
                id,
                company_id,
                name: name.to_string(),
                is_active: true,
            },
        );
        id
    }

    pub(crate) fn add_account(
        &self,
        company_id: CompanyId,
        code: &str,
        name: &str,
        account_type: AccountType,
    ) -> AccountId {
        let id = AccountId::new();
        self.data.lock().unwrap().accounts.insert(
            id,
            Account {
                id,
                company_id,
                code: code.to_string(),
                name: name.to_string(),
                account_type,
                is_active: true,
                balance: Decimal::ZERO,
                version: 0,
            },
        );
        id
    }

    pub(crate) fn account(&self, id: AccountId) -> Account {
        self.data.lock().unwrap().accounts[&id].clone()
    }

    pub(crate) fn entry(&self, id: JournalEntryId) -> JournalEntry {
        self.data.lock().unwrap().entries[&id].clone()
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.data.lock().unwrap().entries.len()
    }

    pub(crate) fn invoice(&self, id: InvoiceId) -> Invoice {
        self.data.lock().unwrap().invoices[&id].clone()
    }

    pub(crate) fn invoice_count(&self) -> usize {
        self.data.lock().unwrap().invoices.len()
    }

    pub(crate) fn payment(&self, id: PaymentId) -> Payment {
        self.data.lock().unwrap().payments[&id].clone()
    }

    pub(crate) fn allocations_of(&self, payment_id: PaymentId) -> Vec<PaymentAllocation> {
        let mut allocations: Vec<PaymentAllocation> = self
            .data
            .lock()
            .unwrap()
            .allocations
            .values()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| a.id);
        allocations
    }

    pub(crate) fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.lock().unwrap().clone()
    }

    pub(crate) fn set_audit_down(&self, down: bool) {
        self.audit_down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn record(&self, scope: &IdempotencyScope) -> Option<IdempotencyRecord> {
        self.records.lock().unwrap().get(&record_key(scope)).cloned()
    }
}

#[async_trait]
impl TenantDirectory for MemoryStore {
    async fn resolve_tenant(&self, candidate: &TenantCandidate) -> Result<Tenant, StoreError> {
        let data = self.data.lock().unwrap();
        data.companies
            .iter()
            .find(|c| match candidate {
                TenantCandidate::Id(id) => c.id == *id,
                TenantCandidate::LegacyId(legacy) => c.legacy_id == Some(*legacy),
                TenantCandidate::Slug(slug) => c.slug == *slug,
            })
            .cloned()
            .ok_or_else(|| TenantError::NotFound(candidate.to_string()).into())
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryStore {
    async fn begin(
        &self,
        scope: &IdempotencyScope,
        fingerprint: &str,
        policy: &IdempotencyPolicy,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome, StoreError> {
        let mut records = self.records.lock().unwrap();
        let key = record_key(scope);
        if let Some(record) = records.get_mut(&key) {
            return Ok(record.admit(fingerprint, now, policy));
        }
        let (record, lease) = IdempotencyRecord::start(scope.clone(), fingerprint, now, policy);
        records.insert(key, record);
        Ok(BeginOutcome::Fresh(lease))
    }

    async fn fail(&self, lease: &Lease, error: &ErrorBody, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(record) = self.records.lock().unwrap().get_mut(&record_key(&lease.scope)) {
            record.fail(lease.token, error, now);
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, record| !record.is_purgeable(now));
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        if self.audit_down.load(Ordering::SeqCst) {
            return Err(StoreError::Database("audit sink unavailable".to_string()));
        }
        self.audit.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl CommandStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin_unit(&self, tenant: &TenantContext) -> Result<MemoryUnit, StoreError> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let data = self.data.lock().unwrap().clone();
        Ok(MemoryUnit {
            tenant: tenant.clone(),
            data,
            shared: Arc::clone(&self.data),
            records: Arc::clone(&self.records),
            completion: None,
            events: Vec::new(),
            _writer: writer,
        })
    }
}

/// One serialised unit of work.
pub(crate) struct MemoryUnit {
    tenant: TenantContext,
    data: Data,
    shared: Arc<Mutex<Data>>,
    records: Arc<Mutex<HashMap<RecordKey, IdempotencyRecord>>>,
    completion: Option<(Lease, String)>,
    events: Vec<DomainEvent>,
    _writer: OwnedMutexGuard<()>,
}

impl MemoryUnit {
    fn guard(&self, entity: &'static str, id: impl Into<Uuid>, owner: CompanyId) -> Result<(), StoreError> {
        Ok(self.tenant.guard(entity, id.into(), owner)?)
    }

    fn owned<'a, K, T>(
        &self,
        map: &'a HashMap<K, T>,
        entity: &'static str,
        id: K,
        owner: impl Fn(&T) -> CompanyId,
    ) -> Result<&'a T, StoreError>
    where
        K: std::hash::Hash + Eq + Copy + Into<Uuid>,
    {
        let record = map.get(&id).ok_or_else(|| StoreError::not_found(entity, id))?;
        self.guard(entity, id, owner(record))?;
        Ok(record)
    }
}

#[async_trait]
impl LedgerStore for MemoryUnit {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError> {
        let company_id = self.tenant.company_id();
        let mut accounts: Vec<Account> = ids
            .iter()
            .filter_map(|id| self.data.accounts.get(id))
            .filter(|a| a.company_id == company_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.guard("account", account.id, account.company_id)?;
        self.data.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.guard("journal_entry", entry.id, entry.company_id)?;
        self.data.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn lock_journal_entry(&mut self, id: JournalEntryId) -> Result<JournalEntry, StoreError> {
        self.owned(&self.data.entries, "journal_entry", id, |e| e.company_id).cloned()
    }

    async fn save_journal_entry_void(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.guard("journal_entry", entry.id, entry.company_id)?;
        self.data.entries.insert(entry.id, entry.clone());
        Ok(())
    }
}

#[async_trait]
impl BillingStore for MemoryUnit {
    async fn find_customer(&mut self, id: CustomerId) -> Result<Customer, StoreError> {
        self.owned(&self.data.customers, "customer", id, |c| c.company_id).cloned()
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.guard("invoice", invoice.id, invoice.company_id)?;
        let duplicate = self
            .data
            .invoices
            .values()
            .any(|i| i.company_id == invoice.company_id && i.number == invoice.number);
        if duplicate {
            return Err(StoreError::Duplicate {
                entity: "invoice",
                detail: invoice.number.clone(),
            });
        }
        self.data.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.guard("payment", payment.id, payment.company_id)?;
        self.data.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn lock_payment(&mut self, id: PaymentId) -> Result<Payment, StoreError> {
        self.owned(&self.data.payments, "payment", id, |p| p.company_id).cloned()
    }

    async fn lock_invoices(&mut self, ids: &[InvoiceId]) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices = ids
            .iter()
            .map(|id| self.owned(&self.data.invoices, "invoice", *id, |i| i.company_id).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        invoices.sort_by_key(|i| i.id);
        Ok(invoices)
    }

    async fn lock_outstanding_invoices(
        &mut self,
        customer_id: CustomerId,
        currency: Currency,
    ) -> Result<Vec<Invoice>, StoreError> {
        let company_id = self.tenant.company_id();
        let mut invoices: Vec<Invoice> = self
            .data
            .invoices
            .values()
            .filter(|i| {
                i.company_id == company_id && i.customer_id == customer_id && i.currency == currency && i.is_outstanding()
            })
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.id);
        Ok(invoices)
    }

    async fn find_allocation(&mut self, id: AllocationId) -> Result<PaymentAllocation, StoreError> {
        self.owned(&self.data.allocations, "payment_allocation", id, |a| a.company_id).cloned()
    }

    async fn lock_allocation(&mut self, id: AllocationId) -> Result<PaymentAllocation, StoreError> {
        self.find_allocation(id).await
    }

    async fn lock_active_allocations(&mut self, payment_id: PaymentId) -> Result<Vec<PaymentAllocation>, StoreError> {
        let company_id = self.tenant.company_id();
        let mut allocations: Vec<PaymentAllocation> = self
            .data
            .allocations
            .values()
            .filter(|a| a.company_id == company_id && a.payment_id == payment_id && a.is_active())
            .cloned()
            .collect();
        allocations.sort_by_key(|a| a.id);
        Ok(allocations)
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        self.guard("payment_allocation", allocation.id, allocation.company_id)?;
        self.data.allocations.insert(allocation.id, allocation.clone());
        Ok(())
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.guard("invoice", invoice.id, invoice.company_id)?;
        self.data.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.guard("payment", payment.id, payment.company_id)?;
        self.data.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn save_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        self.guard("payment_allocation", allocation.id, allocation.company_id)?;
        self.data.allocations.insert(allocation.id, allocation.clone());
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    async fn member_role(&mut self, actor: UserId) -> Result<Option<Role>, StoreError> {
        Ok(self.data.members.get(&(self.tenant.company_id(), actor)).copied())
    }

    async fn complete_idempotency(&mut self, lease: &Lease, result: &str) -> Result<(), StoreError> {
        let held = self
            .records
            .lock()
            .unwrap()
            .get(&record_key(&lease.scope))
            .is_some_and(|r| r.is_held_by(lease.token));
        if !held {
            return Err(StoreError::LeaseLost {
                command: lease.scope.command.clone(),
                key: lease.scope.key.to_string(),
            });
        }
        self.completion = Some((lease.clone(), result.to_string()));
        Ok(())
    }

    fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    async fn commit(self) -> Result<Vec<DomainEvent>, StoreError> {
        let mut records = self.records.lock().unwrap();
        if let Some((lease, result)) = &self.completion {
            let completed = records
                .get_mut(&record_key(&lease.scope))
                .is_some_and(|r| r.complete(lease.token, result, Utc::now()));
            if !completed {
                return Err(StoreError::LeaseLost {
                    command: lease.scope.command.clone(),
                    key: lease.scope.key.to_string(),
                });
            }
        }
        *self.shared.lock().unwrap() = self.data;
        drop(records);
        Ok(self.events)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
