//! Append-only audit log.

use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tally_core::audit::AuditLogEntry;
use tally_core::store::StoreError;

use super::{db_error, stamp};
use crate::entities::audit_logs;
use crate::rls::TenantSession;

const ENTITY: &str = "audit_log";

/// Audit repository over the connection pool.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    db: DatabaseConnection,
}

impl AuditRepository {
    /// Creates a new audit repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Writes one entry in its own tenant session.
    pub async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let row = to_row(entry)?;
        let session = TenantSession::begin(&self.db, entry.company_id)
            .await
            .map_err(|e| db_error(ENTITY, e))?;
        row.insert(session.transaction())
            .await
            .map_err(|e| db_error(ENTITY, e))?;
        session.commit().await.map_err(|e| db_error(ENTITY, e))
    }
}

fn to_row(entry: &AuditLogEntry) -> Result<audit_logs::ActiveModel, StoreError> {
    let error = entry
        .error
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(audit_logs::ActiveModel {
        id: Set(entry.id.into_inner()),
        company_id: Set(entry.company_id.into_inner()),
        actor_id: Set(entry.actor_id.into_inner()),
        action: Set(entry.action.clone()),
        idempotency_key: Set(entry.idempotency_key.clone()),
        params: Set(entry.params.clone()),
        result: Set(entry.result.clone()),
        error: Set(error),
        outcome: Set(entry.outcome.as_str().to_string()),
        occurred_at: Set(stamp(entry.occurred_at)),
    })
}
