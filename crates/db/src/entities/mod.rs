//! `SeaORM` entity definitions.
//!
//! Enum-like columns (`status`, `account_type`, `role`, ...) are stored as
//! text guarded by `CHECK` constraints and parsed into the core enums by the
//! repositories.

pub mod audit_logs;
pub mod chart_of_accounts;
pub mod companies;
pub mod company_users;
pub mod customers;
pub mod idempotency_records;
pub mod invoice_lines;
pub mod invoices;
pub mod journal_entries;
pub mod journal_lines;
pub mod payment_allocations;
pub mod payments;

pub mod prelude {
    //! Entity re-exports.

    pub use super::audit_logs::Entity as AuditLogs;
    pub use super::chart_of_accounts::Entity as ChartOfAccounts;
    pub use super::companies::Entity as Companies;
    pub use super::company_users::Entity as CompanyUsers;
    pub use super::customers::Entity as Customers;
    pub use super::idempotency_records::Entity as IdempotencyRecords;
    pub use super::invoice_lines::Entity as InvoiceLines;
    pub use super::invoices::Entity as Invoices;
    pub use super::journal_entries::Entity as JournalEntries;
    pub use super::journal_lines::Entity as JournalLines;
    pub use super::payment_allocations::Entity as PaymentAllocations;
    pub use super::payments::Entity as Payments;
}
