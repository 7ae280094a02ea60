//! PostgreSQL implementation of the core storage ports.
//!
//! [`PgStore`] owns the pool. Each [`PgUnit`] is one [`TenantSession`]: a
//! transaction with the company context bound, so row-level security applies
//! to every statement the unit issues. Row locks come from `SELECT ... FOR
//! UPDATE` in the repositories and are held until the unit commits or rolls
//! back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tally_core::audit::{AuditLogEntry, DomainEvent};
use tally_core::authz::Role;
use tally_core::billing::{Customer, Invoice, Payment, PaymentAllocation};
use tally_core::idempotency::{BeginOutcome, IdempotencyPolicy, IdempotencyScope, Lease};
use tally_core::ledger::{Account, JournalEntry};
use tally_core::store::{
    AuditSink, BillingStore, CommandStore, IdempotencyLedger, LedgerStore, StoreError, TenantDirectory, UnitOfWork,
};
use tally_core::tenant::{Tenant, TenantCandidate, TenantContext};
use tally_shared::ErrorBody;
use tally_shared::types::{
    AccountId, AllocationId, CompanyId, Currency, CustomerId, InvoiceId, JournalEntryId, PaymentId, UserId,
};
use uuid::Uuid;

use crate::repositories::{
    AccountRepository, AuditRepository, CompanyRepository, IdempotencyRepository, InvoiceRepository,
    JournalRepository, PaymentRepository, db_error,
};
use crate::rls::TenantSession;

/// Command store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    db: DatabaseConnection,
    companies: CompanyRepository,
    idempotency: IdempotencyRepository,
    audit: AuditRepository,
}

impl PgStore {
    /// Wraps a connection pool.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            companies: CompanyRepository::new(db.clone()),
            idempotency: IdempotencyRepository::new(db.clone()),
            audit: AuditRepository::new(db.clone()),
            db,
        }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl TenantDirectory for PgStore {
    async fn resolve_tenant(&self, candidate: &TenantCandidate) -> Result<Tenant, StoreError> {
        self.companies.resolve(candidate).await
    }
}

#[async_trait]
impl IdempotencyLedger for PgStore {
    async fn begin(
        &self,
        scope: &IdempotencyScope,
        fingerprint: &str,
        policy: &IdempotencyPolicy,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome, StoreError> {
        self.idempotency.begin(scope, fingerprint, policy, now).await
    }

    async fn fail(&self, lease: &Lease, error: &ErrorBody, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.idempotency.fail(lease, error, now).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.idempotency.purge(now).await
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.audit.append(entry).await
    }
}

#[async_trait]
impl CommandStore for PgStore {
    type Unit = PgUnit;

    async fn begin_unit(&self, tenant: &TenantContext) -> Result<PgUnit, StoreError> {
        let session = TenantSession::begin(&self.db, tenant.company_id())
            .await
            .map_err(|e| db_error("unit_of_work", e))?;
        tracing::debug!(company_id = %tenant.company_id(), "Opened unit of work");
        Ok(PgUnit {
            session,
            tenant: tenant.clone(),
            events: Vec::new(),
        })
    }
}

/// One tenant-bound transaction.
pub struct PgUnit {
    session: TenantSession,
    tenant: TenantContext,
    events: Vec<DomainEvent>,
}

impl PgUnit {
    fn company_id(&self) -> CompanyId {
        self.tenant.company_id()
    }

    fn guard(&self, entity: &'static str, id: impl Into<Uuid>, owner: CompanyId) -> Result<(), StoreError> {
        Ok(self.tenant.guard(entity, id.into(), owner)?)
    }

    fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(self.session.transaction())
    }

    fn journal(&self) -> JournalRepository<'_> {
        JournalRepository::new(self.session.transaction())
    }

    fn invoices(&self) -> InvoiceRepository<'_> {
        InvoiceRepository::new(self.session.transaction())
    }

    fn payments(&self) -> PaymentRepository<'_> {
        PaymentRepository::new(self.session.transaction())
    }
}

#[async_trait]
impl LedgerStore for PgUnit {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError> {
        self.accounts().lock(self.company_id(), ids).await
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.guard("account", account.id, account.company_id)?;
        self.accounts().save_balance(account).await
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.guard("journal_entry", entry.id, entry.company_id)?;
        self.journal().insert(entry).await
    }

    async fn lock_journal_entry(&mut self, id: JournalEntryId) -> Result<JournalEntry, StoreError> {
        let entry = self.journal().lock(self.company_id(), id).await?;
        self.guard("journal_entry", entry.id, entry.company_id)?;
        Ok(entry)
    }

    async fn save_journal_entry_void(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.guard("journal_entry", entry.id, entry.company_id)?;
        self.journal().save_void(entry).await
    }
}

#[async_trait]
impl BillingStore for PgUnit {
    async fn find_customer(&mut self, id: CustomerId) -> Result<Customer, StoreError> {
        let customer = self.invoices().find_customer(self.company_id(), id).await?;
        self.guard("customer", customer.id, customer.company_id)?;
        Ok(customer)
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.guard("invoice", invoice.id, invoice.company_id)?;
        self.invoices().insert(invoice).await
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.guard("payment", payment.id, payment.company_id)?;
        self.payments().insert_payment(payment).await
    }

    async fn lock_payment(&mut self, id: PaymentId) -> Result<Payment, StoreError> {
        let payment = self.payments().lock_payment(self.company_id(), id).await?;
        self.guard("payment", payment.id, payment.company_id)?;
        Ok(payment)
    }

    async fn lock_invoices(&mut self, ids: &[InvoiceId]) -> Result<Vec<Invoice>, StoreError> {
        let invoices = self.invoices().lock(self.company_id(), ids).await?;
        for invoice in &invoices {
            self.guard("invoice", invoice.id, invoice.company_id)?;
        }
        Ok(invoices)
    }

    async fn lock_outstanding_invoices(
        &mut self,
        customer_id: CustomerId,
        currency: Currency,
    ) -> Result<Vec<Invoice>, StoreError> {
        self.invoices()
            .lock_outstanding(self.company_id(), customer_id, currency)
            .await
    }

    async fn find_allocation(&mut self, id: AllocationId) -> Result<PaymentAllocation, StoreError> {
        let allocation = self.payments().find_allocation(self.company_id(), id).await?;
        self.guard("payment_allocation", allocation.id, allocation.company_id)?;
        Ok(allocation)
    }

    async fn lock_allocation(&mut self, id: AllocationId) -> Result<PaymentAllocation, StoreError> {
        let allocation = self.payments().lock_allocation(self.company_id(), id).await?;
        self.guard("payment_allocation", allocation.id, allocation.company_id)?;
        Ok(allocation)
    }

    async fn lock_active_allocations(&mut self, payment_id: PaymentId) -> Result<Vec<PaymentAllocation>, StoreError> {
        self.payments()
            .lock_active_allocations(self.company_id(), payment_id)
            .await
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        self.guard("payment_allocation", allocation.id, allocation.company_id)?;
        self.payments().insert_allocation(allocation).await
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.guard("invoice", invoice.id, invoice.company_id)?;
        self.invoices().save(invoice).await
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.guard("payment", payment.id, payment.company_id)?;
        self.payments().save_payment(payment).await
    }

    async fn save_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        self.guard("payment_allocation", allocation.id, allocation.company_id)?;
        self.payments().save_allocation(allocation).await
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    async fn member_role(&mut self, actor: UserId) -> Result<Option<Role>, StoreError> {
        CompanyRepository::member_role(self.session.transaction(), self.company_id(), actor).await
    }

    async fn complete_idempotency(&mut self, lease: &Lease, result: &str) -> Result<(), StoreError> {
        self.guard("idempotency_record", lease.token, lease.scope.company_id)?;
        IdempotencyRepository::complete(self.session.transaction(), lease, result, Utc::now()).await
    }

    fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    async fn commit(self) -> Result<Vec<DomainEvent>, StoreError> {
        self.session
            .commit()
            .await
            .map_err(|e| db_error("unit_of_work", e))?;
        tracing::debug!(
            company_id = %self.tenant.company_id(),
            events = self.events.len(),
            "Committed unit of work"
        );
        Ok(self.events)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.session
            .rollback()
            .await
            .map_err(|e| db_error("unit_of_work", e))
    }
}
