//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for database operations, hiding
//! the `SeaORM` implementation details from the store. Transaction-scoped
//! repositories borrow a [`DatabaseTransaction`](sea_orm::DatabaseTransaction)
//! bound by a [`TenantSession`](crate::rls::TenantSession); the rest own the
//! connection pool and open their own sessions.

pub mod account;
pub mod audit;
pub mod company;
pub mod idempotency;
pub mod invoice;
pub mod journal;
pub mod payment;

pub use account::AccountRepository;
pub use audit::AuditRepository;
pub use company::CompanyRepository;
pub use idempotency::IdempotencyRepository;
pub use invoice::InvoiceRepository;
pub use journal::JournalRepository;
pub use payment::PaymentRepository;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, SqlErr, Statement};
use tally_core::store::StoreError;
use tally_shared::types::{CompanyId, Currency};
use uuid::Uuid;

/// Maps a driver error to the core's storage error.
///
/// Unique violations become `Duplicate`; everything else is opaque.
pub(crate) fn db_error(entity: &'static str, error: DbErr) -> StoreError {
    match error.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Duplicate { entity, detail },
        _ => StoreError::Database(error.to_string()),
    }
}

/// Explains why `id` was not visible to the current session.
///
/// Row-level security hides other companies' rows, so a miss is resolved
/// through `record_owner`, which sees every row.
pub(crate) async fn missing<C: ConnectionTrait>(
    conn: &C,
    entity: &'static str,
    table: &str,
    id: Uuid,
    company_id: CompanyId,
) -> StoreError {
    let statement = Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "SELECT record_owner($1, $2) AS owner",
        [table.into(), id.into()],
    );
    let owner = match conn.query_one(statement).await {
        Ok(Some(row)) => row.try_get::<Option<Uuid>>("", "owner"),
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    };
    match owner {
        Ok(Some(owner)) if owner != company_id.into_inner() => StoreError::mismatch(entity, id),
        Ok(_) => StoreError::not_found(entity, id),
        Err(e) => db_error(entity, e),
    }
}

/// Parses a text column into a core enum.
pub(crate) fn decode<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Database)
}

pub(crate) fn currency(code: &str) -> Result<Currency, StoreError> {
    decode(code)
}

pub(crate) fn utc(value: DateTimeWithTimeZone) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

pub(crate) fn stamp(value: DateTime<Utc>) -> DateTimeWithTimeZone {
    value.into()
}
