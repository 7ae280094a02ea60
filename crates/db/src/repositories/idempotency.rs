//! Durable idempotency records.
//!
//! `begin` and `fail` each run in their own short tenant session so the
//! record is visible to competing workers before the business transaction
//! starts. Completion happens inside the business transaction through
//! [`IdempotencyRepository::complete`], fenced on the lease token.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QuerySelect, Select, Set, Statement,
};
use tally_core::idempotency::{
    BeginOutcome, IdempotencyPolicy, IdempotencyRecord, IdempotencyScope, IdempotencyStatus, Lease,
};
use tally_core::store::StoreError;
use tally_shared::ErrorBody;
use uuid::Uuid;

use super::{db_error, decode, stamp, utc};
use crate::entities::idempotency_records::{self, Column};
use crate::rls::TenantSession;

const ENTITY: &str = "idempotency_record";

/// Idempotency repository over the connection pool.
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    db: DatabaseConnection,
}

impl IdempotencyRepository {
    /// Creates a new idempotency repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Inserts an `in_progress` record, or admits the caller to the existing one.
    ///
    /// The insert uses `ON CONFLICT DO NOTHING`; when it loses, the existing
    /// row is read under `FOR UPDATE` and evaluated. A reclaimed record is
    /// written back before the session commits.
    pub async fn begin(
        &self,
        scope: &IdempotencyScope,
        fingerprint: &str,
        policy: &IdempotencyPolicy,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome, StoreError> {
        let session = TenantSession::begin(&self.db, scope.company_id)
            .await
            .map_err(|e| db_error(ENTITY, e))?;
        let txn = session.transaction();

        let (record, lease) = IdempotencyRecord::start(scope.clone(), fingerprint, now, policy);
        let inserted = idempotency_records::Entity::insert(new_row(&record)?)
            .on_conflict(
                OnConflict::columns([Column::CompanyId, Column::Command, Column::IdempotencyKey])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        if inserted == 1 {
            session.commit().await.map_err(|e| db_error(ENTITY, e))?;
            return Ok(BeginOutcome::Fresh(lease));
        }

        let row = scoped(scope)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?
            .ok_or_else(|| {
                StoreError::Database(format!(
                    "Idempotency record {}/{} vanished during begin",
                    scope.command, scope.key
                ))
            })?;
        let row_id = row.id;
        let mut existing = to_record(scope, row)?;
        let outcome = existing.admit(fingerprint, now, policy);

        if matches!(outcome, BeginOutcome::Fresh(_)) {
            tracing::info!(
                command = %scope.command,
                key = %scope.key,
                attempts = existing.attempts,
                "Reclaimed idempotency record"
            );
            let mut reclaimed = new_row(&existing)?;
            reclaimed.id = Set(row_id);
            reclaimed.update(txn).await.map_err(|e| db_error(ENTITY, e))?;
        }

        session.commit().await.map_err(|e| db_error(ENTITY, e))?;
        Ok(outcome)
    }

    /// Completes the record inside the caller's transaction.
    ///
    /// Fails with `LeaseLost` unless the row is still `in_progress` under
    /// the lease token.
    pub async fn complete(
        txn: &DatabaseTransaction,
        lease: &Lease,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = idempotency_records::Entity::update_many()
            .col_expr(Column::Status, Expr::value(IdempotencyStatus::Completed.as_str()))
            .col_expr(Column::Result, Expr::value(result))
            .col_expr(Column::UpdatedAt, Expr::value(stamp(now)))
            .filter(held_by(lease))
            .exec(txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        if updated.rows_affected == 1 {
            Ok(())
        } else {
            Err(StoreError::LeaseLost {
                command: lease.scope.command.clone(),
                key: lease.scope.key.to_string(),
            })
        }
    }

    /// Marks the record failed in its own session. A lost lease is a no-op.
    pub async fn fail(&self, lease: &Lease, error: &ErrorBody, now: DateTime<Utc>) -> Result<(), StoreError> {
        let body = serde_json::to_value(error).map_err(|e| StoreError::Database(e.to_string()))?;
        let session = TenantSession::begin(&self.db, lease.scope.company_id)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        let updated = idempotency_records::Entity::update_many()
            .col_expr(Column::Status, Expr::value(IdempotencyStatus::Failed.as_str()))
            .col_expr(Column::Error, Expr::value(body))
            .col_expr(Column::UpdatedAt, Expr::value(stamp(now)))
            .filter(held_by(lease))
            .exec(session.transaction())
            .await
            .map_err(|e| db_error(ENTITY, e))?;
        session.commit().await.map_err(|e| db_error(ENTITY, e))?;

        if updated.rows_affected == 0 {
            tracing::warn!(
                command = %lease.scope.command,
                key = %lease.scope.key,
                "Idempotency lease lost before failure was recorded"
            );
        }
        Ok(())
    }

    /// Deletes expired records across every company.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let statement = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT purge_idempotency_records($1) AS purged",
            [stamp(now).into()],
        );
        let purged = match self.db.query_one(statement).await.map_err(|e| db_error(ENTITY, e))? {
            Some(row) => row.try_get::<i64>("", "purged").map_err(|e| db_error(ENTITY, e))?,
            None => 0,
        };
        Ok(u64::try_from(purged).unwrap_or(0))
    }
}

fn scoped(scope: &IdempotencyScope) -> Select<idempotency_records::Entity> {
    idempotency_records::Entity::find()
        .filter(Column::CompanyId.eq(scope.company_id.into_inner()))
        .filter(Column::Command.eq(scope.command.as_str()))
        .filter(Column::IdempotencyKey.eq(scope.key.as_str()))
}

fn held_by(lease: &Lease) -> sea_orm::Condition {
    sea_orm::Condition::all()
        .add(Column::CompanyId.eq(lease.scope.company_id.into_inner()))
        .add(Column::Command.eq(lease.scope.command.as_str()))
        .add(Column::IdempotencyKey.eq(lease.scope.key.as_str()))
        .add(Column::Status.eq(IdempotencyStatus::InProgress.as_str()))
        .add(Column::LeaseToken.eq(lease.token))
}

fn new_row(record: &IdempotencyRecord) -> Result<idempotency_records::ActiveModel, StoreError> {
    let error = record
        .error
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(idempotency_records::ActiveModel {
        id: Set(Uuid::now_v7()),
        company_id: Set(record.scope.company_id.into_inner()),
        command: Set(record.scope.command.clone()),
        idempotency_key: Set(record.scope.key.as_str().to_string()),
        status: Set(record.status.as_str().to_string()),
        fingerprint: Set(record.fingerprint.clone()),
        lease_token: Set(record.lease_token),
        locked_until: Set(stamp(record.locked_until)),
        result: Set(record.result.clone()),
        error: Set(error),
        attempts: Set(record.attempts),
        created_at: Set(stamp(record.created_at)),
        updated_at: Set(stamp(record.updated_at)),
        expires_at: Set(stamp(record.expires_at)),
    })
}

fn to_record(scope: &IdempotencyScope, row: idempotency_records::Model) -> Result<IdempotencyRecord, StoreError> {
    let error = row
        .error
        .map(serde_json::from_value::<ErrorBody>)
        .transpose()
        .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(IdempotencyRecord {
        scope: scope.clone(),
        status: decode(&row.status)?,
        fingerprint: row.fingerprint,
        lease_token: row.lease_token,
        locked_until: utc(row.locked_until),
        result: row.result,
        error,
        attempts: row.attempts,
        created_at: utc(row.created_at),
        updated_at: utc(row.updated_at),
        expires_at: utc(row.expires_at),
    })
}
