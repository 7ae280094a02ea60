//! Row-Level Security (RLS) context management.
//!
//! Every tenant-scoped query runs inside a [`TenantSession`]: a transaction
//! that has bound `app.current_company_id` with `set_config(..., true)`, so
//! the setting dies with the transaction and never leaks to the next user of
//! a pooled connection.
//!
//! ```ignore
//! let session = TenantSession::begin(&db, company_id).await?;
//! let invoices = invoices::Entity::find().all(session.transaction()).await?;
//! session.commit().await?;
//! ```

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr, Statement,
    TransactionTrait,
};
use tally_shared::types::CompanyId;

/// Name of the transaction-local setting the policies read.
pub const COMPANY_SETTING: &str = "app.current_company_id";

/// A transaction bound to one company.
pub struct TenantSession {
    txn: DatabaseTransaction,
    company_id: CompanyId,
}

impl TenantSession {
    /// Begins a transaction and binds the company context.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started or the setting
    /// cannot be bound.
    pub async fn begin(db: &DatabaseConnection, company_id: CompanyId) -> Result<Self, DbErr> {
        let txn = db.begin().await?;
        set_company_context(&txn, company_id).await?;
        Ok(Self { txn, company_id })
    }

    /// The bound company.
    #[must_use]
    pub const fn company_id(&self) -> CompanyId {
        self.company_id
    }

    /// Returns the underlying transaction for executing queries.
    #[must_use]
    pub fn transaction(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits the transaction, persisting all changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub async fn commit(self) -> Result<(), DbErr> {
        self.txn.commit().await
    }

    /// Rolls back the transaction, discarding all changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> Result<(), DbErr> {
        self.txn.rollback().await
    }
}

/// Binds the company context on an existing transaction.
///
/// # Errors
///
/// Returns an error if the setting cannot be bound.
pub async fn set_company_context(txn: &DatabaseTransaction, company_id: CompanyId) -> Result<(), DbErr> {
    txn.execute(company_context_statement(company_id)).await?;
    Ok(())
}

fn company_context_statement(company_id: CompanyId) -> Statement {
    Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "SELECT set_config($1, $2, true)",
        [COMPANY_SETTING.into(), company_id.to_string().into()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_context_is_bound_as_parameters() {
        let id = CompanyId::from_uuid(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap());
        let statement = company_context_statement(id);

        assert_eq!(statement.sql, "SELECT set_config($1, $2, true)");
        let values = statement.values.unwrap().0;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], COMPANY_SETTING.into());
        assert_eq!(values[1], "550e8400-e29b-41d4-a716-446655440000".into());
    }
}
