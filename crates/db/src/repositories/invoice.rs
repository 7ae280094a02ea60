//! Customers, invoices and invoice lines.

use std::collections::HashMap;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tally_core::billing::{Customer, Invoice, InvoiceLine};
use tally_core::store::StoreError;
use tally_shared::types::{CompanyId, Currency, CustomerId, InvoiceId, JournalEntryId, UserId};
use uuid::Uuid;

use super::{currency, db_error, decode, missing, stamp, utc};
use crate::entities::{customers, invoice_lines, invoices};

const ENTITY: &str = "invoice";
const TABLE: &str = "invoices";

/// Invoice repository bound to one tenant transaction.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> InvoiceRepository<'a> {
    /// Creates a repository over `txn`.
    #[must_use]
    pub const fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }

    /// Loads a customer.
    pub async fn find_customer(&self, company_id: CompanyId, id: CustomerId) -> Result<Customer, StoreError> {
        let row = customers::Entity::find_by_id(id.into_inner())
            .one(self.txn)
            .await
            .map_err(|e| db_error("customer", e))?;
        match row {
            Some(row) => Ok(Customer {
                id: CustomerId::from_uuid(row.id),
                company_id: CompanyId::from_uuid(row.company_id),
                name: row.name,
                is_active: row.is_active,
            }),
            None => Err(missing(self.txn, "customer", "customers", id.into_inner(), company_id).await),
        }
    }

    /// Inserts an invoice and its lines. A reused number yields `Duplicate`.
    pub async fn insert(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let header = invoices::ActiveModel {
            id: Set(invoice.id.into_inner()),
            company_id: Set(invoice.company_id.into_inner()),
            customer_id: Set(invoice.customer_id.into_inner()),
            number: Set(invoice.number.clone()),
            issue_date: Set(invoice.issue_date),
            due_date: Set(invoice.due_date),
            currency: Set(invoice.currency.code().to_string()),
            total: Set(invoice.total),
            paid: Set(invoice.paid),
            status: Set(invoice.status.as_str().to_string()),
            journal_entry_id: Set(invoice.journal_entry_id.map(JournalEntryId::into_inner)),
            memo: Set(invoice.memo.clone()),
            created_by: Set(invoice.created_by.into_inner()),
            created_at: Set(stamp(invoice.created_at)),
            updated_at: Set(stamp(invoice.updated_at)),
        };
        header.insert(self.txn).await.map_err(|e| match db_error(ENTITY, e) {
            StoreError::Duplicate { entity, .. } => StoreError::Duplicate {
                entity,
                detail: invoice.number.clone(),
            },
            other => other,
        })?;

        for line in &invoice.lines {
            let row = invoice_lines::ActiveModel {
                id: Set(Uuid::new_v4()),
                company_id: Set(invoice.company_id.into_inner()),
                invoice_id: Set(invoice.id.into_inner()),
                line_no: Set(line.line_no),
                description: Set(line.description.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                amount: Set(line.amount),
            };
            row.insert(self.txn).await.map_err(|e| db_error(ENTITY, e))?;
        }
        Ok(())
    }

    /// Locks the given invoices with `FOR UPDATE`, in id order.
    ///
    /// Every id must resolve to an invoice of the bound company.
    pub async fn lock(&self, company_id: CompanyId, ids: &[InvoiceId]) -> Result<Vec<Invoice>, StoreError> {
        let mut wanted: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        wanted.sort_unstable();
        wanted.dedup();

        let rows = invoices::Entity::find()
            .filter(invoices::Column::Id.is_in(wanted.clone()))
            .order_by_asc(invoices::Column::Id)
            .lock_exclusive()
            .all(self.txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        if rows.len() != wanted.len() {
            let found: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
            if let Some(absent) = wanted.iter().find(|id| !found.contains(id)) {
                return Err(missing(self.txn, ENTITY, TABLE, *absent, company_id).await);
            }
        }

        self.with_lines(rows).await
    }

    /// Locks the customer's invoices that still have a balance due, in id order.
    pub async fn lock_outstanding(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
        currency: Currency,
    ) -> Result<Vec<Invoice>, StoreError> {
        let rows = invoices::Entity::find()
            .filter(invoices::Column::CompanyId.eq(company_id.into_inner()))
            .filter(invoices::Column::CustomerId.eq(customer_id.into_inner()))
            .filter(invoices::Column::Currency.eq(currency.code()))
            .filter(invoices::Column::Status.ne("paid"))
            .order_by_asc(invoices::Column::Id)
            .lock_exclusive()
            .all(self.txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        let invoices = self.with_lines(rows).await?;
        Ok(invoices.into_iter().filter(Invoice::is_outstanding).collect())
    }

    /// Writes `paid`, `status` and `updated_at` of a locked invoice.
    pub async fn save(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let row = invoices::ActiveModel {
            id: Set(invoice.id.into_inner()),
            paid: Set(invoice.paid),
            status: Set(invoice.status.as_str().to_string()),
            updated_at: Set(stamp(invoice.updated_at)),
            ..Default::default()
        };
        row.update(self.txn).await.map_err(|e| db_error(ENTITY, e))?;
        Ok(())
    }

    async fn with_lines(&self, rows: Vec<invoices::Model>) -> Result<Vec<Invoice>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let lines = invoice_lines::Entity::find()
            .filter(invoice_lines::Column::InvoiceId.is_in(ids))
            .order_by_asc(invoice_lines::Column::InvoiceId)
            .order_by_asc(invoice_lines::Column::LineNo)
            .all(self.txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        let mut by_invoice: HashMap<Uuid, Vec<InvoiceLine>> = HashMap::new();
        for line in lines {
            by_invoice.entry(line.invoice_id).or_default().push(InvoiceLine {
                line_no: line.line_no,
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                amount: line.amount,
            });
        }

        rows.into_iter()
            .map(|row| {
                let lines = by_invoice.remove(&row.id).unwrap_or_default();
                to_invoice(row, lines)
            })
            .collect()
    }
}

fn to_invoice(row: invoices::Model, lines: Vec<InvoiceLine>) -> Result<Invoice, StoreError> {
    Ok(Invoice {
        id: InvoiceId::from_uuid(row.id),
        company_id: CompanyId::from_uuid(row.company_id),
        customer_id: CustomerId::from_uuid(row.customer_id),
        number: row.number,
        issue_date: row.issue_date,
        due_date: row.due_date,
        currency: currency(&row.currency)?,
        total: row.total,
        paid: row.paid,
        status: decode(&row.status)?,
        lines,
        journal_entry_id: row.journal_entry_id.map(JournalEntryId::from_uuid),
        memo: row.memo,
        created_by: UserId::from_uuid(row.created_by),
        created_at: utc(row.created_at),
        updated_at: utc(row.updated_at),
    })
}
