//! Row-level security for every tenant table.
//!
//! Policies key on the transaction-local setting `app.current_company_id`.
//! RLS is both enabled and forced, so the table owner is filtered too. The
//! two `SECURITY DEFINER` helpers run as the migration role, which must be a
//! superuser or hold `BYPASSRLS`:
//!
//! - `record_owner(entity, id)` reports which company owns a record, letting
//!   the store tell a cross-tenant access apart from a missing record.
//! - `purge_idempotency_records(cutoff)` deletes expired idempotency records
//!   across all companies.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(&enable_rls_sql()).await?;
        db.execute_unprepared(FUNCTIONS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_FUNCTIONS_SQL).await?;
        db.execute_unprepared(&disable_rls_sql()).await?;
        Ok(())
    }
}

/// Tables carrying a `company_id` column. `companies` itself stays readable
/// for tenant resolution.
const TENANT_TABLES: &[&str] = &[
    "company_users",
    "customers",
    "chart_of_accounts",
    "journal_entries",
    "journal_lines",
    "invoices",
    "invoice_lines",
    "payments",
    "payment_allocations",
    "idempotency_records",
    "audit_logs",
];

fn enable_rls_sql() -> String {
    TENANT_TABLES
        .iter()
        .map(|table| {
            format!(
                "ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;
ALTER TABLE {table} FORCE ROW LEVEL SECURITY;
CREATE POLICY tenant_isolation ON {table}
    USING (company_id = NULLIF(current_setting('app.current_company_id', true), '')::UUID)
    WITH CHECK (company_id = NULLIF(current_setting('app.current_company_id', true), '')::UUID);
"
            )
        })
        .collect()
}

fn disable_rls_sql() -> String {
    TENANT_TABLES
        .iter()
        .map(|table| {
            format!(
                "DROP POLICY IF EXISTS tenant_isolation ON {table};
ALTER TABLE {table} NO FORCE ROW LEVEL SECURITY;
ALTER TABLE {table} DISABLE ROW LEVEL SECURITY;
"
            )
        })
        .collect()
}

const FUNCTIONS_SQL: &str = r"
CREATE OR REPLACE FUNCTION record_owner(entity TEXT, record_id UUID)
RETURNS UUID
LANGUAGE plpgsql
STABLE
SECURITY DEFINER
SET search_path = public
AS $$
DECLARE
    owner_id UUID;
BEGIN
    IF entity NOT IN (
        'customers', 'chart_of_accounts', 'journal_entries',
        'invoices', 'payments', 'payment_allocations'
    ) THEN
        RAISE EXCEPTION 'record_owner: unsupported entity %', entity;
    END IF;

    EXECUTE format('SELECT company_id FROM %I WHERE id = $1', entity)
    INTO owner_id
    USING record_id;

    RETURN owner_id;
END;
$$;

CREATE OR REPLACE FUNCTION purge_idempotency_records(cutoff TIMESTAMPTZ)
RETURNS BIGINT
LANGUAGE plpgsql
SECURITY DEFINER
SET search_path = public
AS $$
DECLARE
    purged BIGINT;
BEGIN
    DELETE FROM idempotency_records
    WHERE expires_at <= cutoff
      AND NOT (status = 'in_progress' AND locked_until > cutoff);
    GET DIAGNOSTICS purged = ROW_COUNT;
    RETURN purged;
END;
$$;
";

const DROP_FUNCTIONS_SQL: &str = r"
DROP FUNCTION IF EXISTS purge_idempotency_records(TIMESTAMPTZ);
DROP FUNCTION IF EXISTS record_owner(TEXT, UUID);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tenant_table_is_forced() {
        let sql = enable_rls_sql();
        for table in TENANT_TABLES {
            assert!(sql.contains(&format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;")));
            assert!(sql.contains(&format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY;")));
            assert!(sql.contains(&format!("CREATE POLICY tenant_isolation ON {table}")));
        }
        assert!(!sql.contains("ON companies\n"));
    }
}
