//! Initial database migration.
//!
//! Creates the tenant directory, the ledger, billing documents, the
//! idempotency ledger and the audit trail. Check constraints restate the
//! invariants the core enforces so that a buggy writer cannot persist an
//! impossible state.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: TENANTS
        // ============================================================
        db.execute_unprepared(COMPANIES_SQL).await?;
        db.execute_unprepared(COMPANY_USERS_SQL).await?;
        db.execute_unprepared(CUSTOMERS_SQL).await?;

        // ============================================================
        // PART 2: LEDGER
        // ============================================================
        db.execute_unprepared(CHART_OF_ACCOUNTS_SQL).await?;
        db.execute_unprepared(JOURNAL_SQL).await?;

        // ============================================================
        // PART 3: BILLING
        // ============================================================
        db.execute_unprepared(INVOICES_SQL).await?;
        db.execute_unprepared(PAYMENTS_SQL).await?;

        // ============================================================
        // PART 4: COMMAND INFRASTRUCTURE
        // ============================================================
        db.execute_unprepared(IDEMPOTENCY_SQL).await?;
        db.execute_unprepared(AUDIT_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const COMPANIES_SQL: &str = r"
CREATE TABLE companies (
    id UUID PRIMARY KEY,
    slug VARCHAR(63) NOT NULL UNIQUE,
    name VARCHAR(255) NOT NULL,
    base_currency CHAR(3) NOT NULL,
    legacy_id BIGINT UNIQUE,
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_company_slug CHECK (slug ~ '^[a-z0-9]([a-z0-9-]*[a-z0-9])?$'),
    CONSTRAINT chk_company_legacy_id CHECK (legacy_id IS NULL OR legacy_id > 0)
);
";

const COMPANY_USERS_SQL: &str = r"
CREATE TABLE company_users (
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    role VARCHAR(20) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (company_id, user_id),
    CONSTRAINT chk_company_user_role CHECK (
        role IN ('owner', 'admin', 'accountant', 'approver', 'viewer', 'submitter')
    )
);

CREATE INDEX idx_company_users_user ON company_users(user_id);
";

const CUSTOMERS_SQL: &str = r"
CREATE TABLE customers (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name VARCHAR(255) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_customers_company ON customers(company_id);
";

const CHART_OF_ACCOUNTS_SQL: &str = r"
CREATE TABLE chart_of_accounts (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    code VARCHAR(20) NOT NULL,
    name VARCHAR(255) NOT NULL,
    account_type VARCHAR(20) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    balance NUMERIC(20, 4) NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (company_id, code),
    CONSTRAINT chk_account_type CHECK (
        account_type IN ('asset', 'liability', 'equity', 'revenue', 'expense')
    ),
    CONSTRAINT chk_account_version CHECK (version >= 0)
);
";

const JOURNAL_SQL: &str = r"
CREATE TABLE journal_entries (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    entry_date DATE NOT NULL,
    description VARCHAR(500) NOT NULL,
    reference VARCHAR(100),
    currency CHAR(3) NOT NULL,
    source_type VARCHAR(20) NOT NULL,
    source_id UUID,
    status VARCHAR(20) NOT NULL DEFAULT 'posted',
    total NUMERIC(20, 4) NOT NULL,
    voided_by UUID REFERENCES journal_entries(id),
    void_reason VARCHAR(500),
    voided_at TIMESTAMPTZ,
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_journal_status CHECK (status IN ('posted', 'voided')),
    CONSTRAINT chk_journal_source CHECK (
        (source_type = 'manual' AND source_id IS NULL)
        OR (source_type IN ('invoice', 'payment', 'void') AND source_id IS NOT NULL)
    ),
    CONSTRAINT chk_journal_total CHECK (total > 0),
    CONSTRAINT chk_journal_void CHECK (
        (status = 'posted' AND voided_by IS NULL AND voided_at IS NULL)
        OR (status = 'voided' AND voided_by IS NOT NULL AND voided_at IS NOT NULL)
    )
);

CREATE INDEX idx_journal_entries_company_date ON journal_entries(company_id, entry_date);
CREATE INDEX idx_journal_entries_source ON journal_entries(source_type, source_id)
    WHERE source_id IS NOT NULL;

CREATE TABLE journal_lines (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    journal_entry_id UUID NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
    line_no INTEGER NOT NULL,
    account_id UUID NOT NULL REFERENCES chart_of_accounts(id),
    debit NUMERIC(20, 4) NOT NULL DEFAULT 0,
    credit NUMERIC(20, 4) NOT NULL DEFAULT 0,
    memo VARCHAR(500),
    UNIQUE (journal_entry_id, line_no),
    CONSTRAINT chk_journal_line_side CHECK (
        (debit > 0 AND credit = 0) OR (credit > 0 AND debit = 0)
    )
);

CREATE INDEX idx_journal_lines_account ON journal_lines(account_id);

-- Posted entries must balance. Deferred so that lines can be inserted one by one.
CREATE OR REPLACE FUNCTION check_journal_balance()
RETURNS TRIGGER AS $$
DECLARE
    total_debit NUMERIC(20, 4);
    total_credit NUMERIC(20, 4);
BEGIN
    SELECT COALESCE(SUM(debit), 0), COALESCE(SUM(credit), 0)
    INTO total_debit, total_credit
    FROM journal_lines
    WHERE journal_entry_id = NEW.journal_entry_id;

    IF total_debit <> total_credit THEN
        RAISE EXCEPTION 'Journal entry % is not balanced. Debit: %, Credit: %',
            NEW.journal_entry_id, total_debit, total_credit;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE CONSTRAINT TRIGGER trg_check_journal_balance
AFTER INSERT OR UPDATE ON journal_lines
DEFERRABLE INITIALLY DEFERRED
FOR EACH ROW
EXECUTE FUNCTION check_journal_balance();
";

const INVOICES_SQL: &str = r"
CREATE TABLE invoices (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    customer_id UUID NOT NULL REFERENCES customers(id),
    number VARCHAR(50) NOT NULL,
    issue_date DATE NOT NULL,
    due_date DATE NOT NULL,
    currency CHAR(3) NOT NULL,
    total NUMERIC(20, 4) NOT NULL,
    paid NUMERIC(20, 4) NOT NULL DEFAULT 0,
    status VARCHAR(20) NOT NULL DEFAULT 'open',
    journal_entry_id UUID REFERENCES journal_entries(id),
    memo VARCHAR(1000),
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (company_id, number),
    CONSTRAINT chk_invoice_total CHECK (total > 0),
    CONSTRAINT chk_invoice_paid CHECK (paid >= 0 AND paid <= total),
    CONSTRAINT chk_invoice_dates CHECK (due_date >= issue_date),
    CONSTRAINT chk_invoice_status CHECK (
        (status = 'open' AND paid = 0)
        OR (status = 'partially_paid' AND paid > 0 AND paid < total)
        OR (status = 'paid' AND paid = total)
    )
);

CREATE INDEX idx_invoices_outstanding ON invoices(company_id, customer_id, currency)
    WHERE status <> 'paid';

CREATE TABLE invoice_lines (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    invoice_id UUID NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
    line_no INTEGER NOT NULL,
    description VARCHAR(500) NOT NULL,
    quantity NUMERIC(20, 4) NOT NULL,
    unit_price NUMERIC(20, 4) NOT NULL,
    amount NUMERIC(20, 4) NOT NULL,
    UNIQUE (invoice_id, line_no),
    CONSTRAINT chk_invoice_line_quantity CHECK (quantity > 0),
    CONSTRAINT chk_invoice_line_price CHECK (unit_price >= 0)
);
";

const PAYMENTS_SQL: &str = r"
CREATE TABLE payments (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    customer_id UUID NOT NULL REFERENCES customers(id),
    payment_date DATE NOT NULL,
    currency CHAR(3) NOT NULL,
    amount NUMERIC(20, 4) NOT NULL,
    allocated NUMERIC(20, 4) NOT NULL DEFAULT 0,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    method VARCHAR(50),
    reference VARCHAR(100),
    journal_entry_id UUID REFERENCES journal_entries(id),
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    reversed_at TIMESTAMPTZ,
    CONSTRAINT chk_payment_amount CHECK (amount > 0),
    CONSTRAINT chk_payment_allocated CHECK (allocated >= 0 AND allocated <= amount),
    CONSTRAINT chk_payment_status CHECK (
        (status = 'active' AND reversed_at IS NULL)
        OR (status = 'reversed' AND reversed_at IS NOT NULL AND allocated = 0)
    )
);

CREATE INDEX idx_payments_customer ON payments(company_id, customer_id);

CREATE TABLE payment_allocations (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    payment_id UUID NOT NULL REFERENCES payments(id),
    invoice_id UUID NOT NULL REFERENCES invoices(id),
    amount NUMERIC(20, 4) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    reversed_by UUID,
    reversed_at TIMESTAMPTZ,
    CONSTRAINT chk_allocation_amount CHECK (amount > 0),
    CONSTRAINT chk_allocation_status CHECK (
        (status = 'active' AND reversed_at IS NULL AND reversed_by IS NULL)
        OR (status = 'reversed' AND reversed_at IS NOT NULL AND reversed_by IS NOT NULL)
    )
);

CREATE INDEX idx_allocations_payment ON payment_allocations(payment_id) WHERE status = 'active';
CREATE INDEX idx_allocations_invoice ON payment_allocations(invoice_id) WHERE status = 'active';
";

const IDEMPOTENCY_SQL: &str = r"
CREATE TABLE idempotency_records (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    command VARCHAR(100) NOT NULL,
    idempotency_key VARCHAR(255) NOT NULL,
    status VARCHAR(20) NOT NULL,
    fingerprint CHAR(64) NOT NULL,
    lease_token UUID NOT NULL,
    locked_until TIMESTAMPTZ NOT NULL,
    result TEXT,
    error JSONB,
    attempts INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT uq_idempotency_scope UNIQUE (company_id, command, idempotency_key),
    CONSTRAINT chk_idempotency_status CHECK (
        (status = 'in_progress' AND result IS NULL)
        OR (status = 'completed' AND result IS NOT NULL)
        OR (status = 'failed' AND error IS NOT NULL)
    ),
    CONSTRAINT chk_idempotency_attempts CHECK (attempts > 0)
);

CREATE INDEX idx_idempotency_expires ON idempotency_records(expires_at);
";

const AUDIT_SQL: &str = r"
CREATE TABLE audit_logs (
    id UUID PRIMARY KEY,
    company_id UUID NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    actor_id UUID NOT NULL,
    action VARCHAR(100) NOT NULL,
    idempotency_key VARCHAR(255) NOT NULL,
    params JSONB NOT NULL,
    result JSONB,
    error JSONB,
    outcome VARCHAR(20) NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_audit_outcome CHECK (outcome IN ('succeeded', 'failed', 'replayed'))
);

CREATE INDEX idx_audit_logs_company_time ON audit_logs(company_id, occurred_at DESC);

CREATE OR REPLACE FUNCTION prevent_audit_modification()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'audit_logs is append-only';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_audit_logs_append_only
BEFORE UPDATE OR DELETE ON audit_logs
FOR EACH ROW
EXECUTE FUNCTION prevent_audit_modification();
";

const DROP_ALL_SQL: &str = r"
DROP TRIGGER IF EXISTS trg_audit_logs_append_only ON audit_logs;
DROP TRIGGER IF EXISTS trg_check_journal_balance ON journal_lines;
DROP FUNCTION IF EXISTS prevent_audit_modification();
DROP FUNCTION IF EXISTS check_journal_balance();

DROP TABLE IF EXISTS audit_logs CASCADE;
DROP TABLE IF EXISTS idempotency_records CASCADE;
DROP TABLE IF EXISTS payment_allocations CASCADE;
DROP TABLE IF EXISTS payments CASCADE;
DROP TABLE IF EXISTS invoice_lines CASCADE;
DROP TABLE IF EXISTS invoices CASCADE;
DROP TABLE IF EXISTS journal_lines CASCADE;
DROP TABLE IF EXISTS journal_entries CASCADE;
DROP TABLE IF EXISTS chart_of_accounts CASCADE;
DROP TABLE IF EXISTS customers CASCADE;
DROP TABLE IF EXISTS company_users CASCADE;
DROP TABLE IF EXISTS companies CASCADE;
";
