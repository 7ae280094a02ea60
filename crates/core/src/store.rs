//! Persistence ports.
//!
//! The core never talks to a database directly. A storage adapter implements
//! these traits; every method that touches a tenant-owned record must reject
//! records outside the unit of work's [`TenantContext`] with
//! `StoreError::Tenant(TenantError::Mismatch { .. })`, and must report a
//! missing record as `StoreError::NotFound`.
//!
//! `lock_*` methods take row-level exclusive locks held until the unit of
//! work ends. Callers lock in this order: payment, allocations, invoices (by
//! id), journal entry, accounts (by id).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_shared::ErrorBody;
use tally_shared::types::{
    AccountId, AllocationId, Currency, CustomerId, InvoiceId, JournalEntryId, PaymentId, UserId,
};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditLogEntry, DomainEvent};
use crate::authz::Role;
use crate::billing::{Customer, Invoice, Payment, PaymentAllocation};
use crate::idempotency::{BeginOutcome, IdempotencyPolicy, IdempotencyScope, Lease};
use crate::ledger::{Account, JournalEntry};
use crate::tenant::{Tenant, TenantCandidate, TenantContext, TenantError};

/// Storage failures, as seen by the core.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id exists.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// Record id.
        id: Uuid,
    },

    /// Tenant resolution failure or cross-tenant access.
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// A unique constraint rejected the write.
    #[error("{entity} already exists: {detail}")]
    Duplicate {
        /// Entity name.
        entity: &'static str,
        /// Offending value.
        detail: String,
    },

    /// The idempotency lease was reclaimed by another worker.
    #[error("Idempotency lease for {command}/{key} was lost")]
    LeaseLost {
        /// Command name.
        command: String,
        /// Client key.
        key: String,
    },

    /// Any other storage failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Shorthand for `NotFound`.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<Uuid>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a tenant mismatch.
    #[must_use]
    pub fn mismatch(entity: &'static str, id: impl Into<Uuid>) -> Self {
        Self::Tenant(TenantError::Mismatch {
            entity,
            id: id.into(),
        })
    }

    /// Returns the error code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Tenant(e) => e.error_code(),
            Self::Duplicate { .. } => "DUPLICATE",
            Self::LeaseLost { .. } => "LEASE_LOST",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Ledger persistence inside a unit of work.
#[async_trait]
pub trait LedgerStore: Send {
    /// Locks the active company's accounts among `ids`, in id order.
    ///
    /// Ids that are missing or owned by another company are omitted rather
    /// than reported, so the ledger can answer `UnknownAccount`.
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError>;

    /// Persists an account's `balance` and `version`.
    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Inserts an entry with its lines.
    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;

    /// Locks an entry and loads its lines.
    async fn lock_journal_entry(&mut self, id: JournalEntryId) -> Result<JournalEntry, StoreError>;

    /// Persists an entry's void fields.
    async fn save_journal_entry_void(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;
}

/// Invoice, payment and allocation persistence inside a unit of work.
#[async_trait]
pub trait BillingStore: Send {
    /// Loads a customer.
    async fn find_customer(&mut self, id: CustomerId) -> Result<Customer, StoreError>;

    /// Inserts an invoice with its lines. Duplicate numbers yield `Duplicate`.
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    /// Inserts a payment.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    /// Locks a payment.
    async fn lock_payment(&mut self, id: PaymentId) -> Result<Payment, StoreError>;

    /// Locks invoices in ascending id order. Every id must resolve.
    async fn lock_invoices(&mut self, ids: &[InvoiceId]) -> Result<Vec<Invoice>, StoreError>;

    /// Locks the customer's invoices with a positive balance due, in id order.
    async fn lock_outstanding_invoices(
        &mut self,
        customer_id: CustomerId,
        currency: Currency,
    ) -> Result<Vec<Invoice>, StoreError>;

    /// Reads an allocation without locking it.
    async fn find_allocation(&mut self, id: AllocationId) -> Result<PaymentAllocation, StoreError>;

    /// Locks an allocation.
    async fn lock_allocation(&mut self, id: AllocationId) -> Result<PaymentAllocation, StoreError>;

    /// Locks a payment's active allocations in id order.
    async fn lock_active_allocations(&mut self, payment_id: PaymentId) -> Result<Vec<PaymentAllocation>, StoreError>;

    /// Inserts an allocation.
    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError>;

    /// Persists an invoice's `paid`, `status` and `updated_at`.
    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    /// Persists a payment's `allocated`, `status` and reversal fields.
    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    /// Persists an allocation's reversal fields.
    async fn save_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError>;
}

/// One tenant-scoped, all-or-nothing transaction.
#[async_trait]
pub trait UnitOfWork: LedgerStore + BillingStore + Send {
    /// The tenant the unit is bound to.
    fn tenant(&self) -> &TenantContext;

    /// Looks up the actor's role in the active company.
    async fn member_role(&mut self, actor: UserId) -> Result<Option<Role>, StoreError>;

    /// Completes the idempotency record in this transaction.
    ///
    /// Fails with `LeaseLost` unless the record is still `in_progress` under
    /// `lease.token`.
    async fn complete_idempotency(&mut self, lease: &Lease, result: &str) -> Result<(), StoreError>;

    /// Queues a domain event, released only if the unit commits.
    fn emit(&mut self, event: DomainEvent);

    /// Commits and returns the queued events.
    async fn commit(self) -> Result<Vec<DomainEvent>, StoreError>;

    /// Discards every change.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Company directory.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Resolves a candidate identifier to a company.
    async fn resolve_tenant(&self, candidate: &TenantCandidate) -> Result<Tenant, StoreError>;
}

/// Durable idempotency records.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Inserts an `in_progress` record if absent, or evaluates the existing one
    /// under a row lock.
    async fn begin(
        &self,
        scope: &IdempotencyScope,
        fingerprint: &str,
        policy: &IdempotencyPolicy,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome, StoreError>;

    /// Marks the record failed if `lease` still holds it. Runs in its own transaction.
    async fn fail(&self, lease: &Lease, error: &ErrorBody, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Deletes records past their retention window that hold no live lease.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one entry.
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
}

/// Everything the dispatcher needs from storage.
#[async_trait]
pub trait CommandStore: TenantDirectory + IdempotencyLedger + AuditSink {
    /// Unit-of-work type.
    type Unit: UnitOfWork + 'static;

    /// Opens a transaction bound to `tenant`.
    async fn begin_unit(&self, tenant: &TenantContext) -> Result<Self::Unit, StoreError>;
}
