//! Payments and payment allocations.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tally_core::billing::{AllocationStatus, Payment, PaymentAllocation};
use tally_core::store::StoreError;
use tally_shared::types::{AllocationId, CompanyId, CustomerId, InvoiceId, JournalEntryId, PaymentId, UserId};

use super::{currency, db_error, decode, missing, stamp, utc};
use crate::entities::{payment_allocations, payments};

const PAYMENT: &str = "payment";
const ALLOCATION: &str = "payment_allocation";

/// Payment repository bound to one tenant transaction.
#[derive(Debug, Clone, Copy)]
pub struct PaymentRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> PaymentRepository<'a> {
    /// Creates a repository over `txn`.
    #[must_use]
    pub const fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }

    /// Inserts a new payment.
    pub async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let row = payments::ActiveModel {
            id: Set(payment.id.into_inner()),
            company_id: Set(payment.company_id.into_inner()),
            customer_id: Set(payment.customer_id.into_inner()),
            payment_date: Set(payment.payment_date),
            currency: Set(payment.currency.code().to_string()),
            amount: Set(payment.amount),
            allocated: Set(payment.allocated),
            status: Set(payment.status.as_str().to_string()),
            method: Set(payment.method.clone()),
            reference: Set(payment.reference.clone()),
            journal_entry_id: Set(payment.journal_entry_id.map(JournalEntryId::into_inner)),
            created_by: Set(payment.created_by.into_inner()),
            created_at: Set(stamp(payment.created_at)),
            updated_at: Set(stamp(payment.updated_at)),
            reversed_at: Set(payment.reversed_at.map(stamp)),
        };
        row.insert(self.txn).await.map_err(|e| db_error(PAYMENT, e))?;
        Ok(())
    }

    /// Locks a payment with `FOR UPDATE`.
    pub async fn lock_payment(&self, company_id: CompanyId, id: PaymentId) -> Result<Payment, StoreError> {
        let row = payments::Entity::find_by_id(id.into_inner())
            .lock_exclusive()
            .one(self.txn)
            .await
            .map_err(|e| db_error(PAYMENT, e))?;
        match row {
            Some(row) => to_payment(row),
            None => Err(missing(self.txn, PAYMENT, "payments", id.into_inner(), company_id).await),
        }
    }

    /// Writes the mutable payment fields.
    pub async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let row = payments::ActiveModel {
            id: Set(payment.id.into_inner()),
            allocated: Set(payment.allocated),
            status: Set(payment.status.as_str().to_string()),
            updated_at: Set(stamp(payment.updated_at)),
            reversed_at: Set(payment.reversed_at.map(stamp)),
            ..Default::default()
        };
        row.update(self.txn).await.map_err(|e| db_error(PAYMENT, e))?;
        Ok(())
    }

    /// Reads an allocation without locking it.
    pub async fn find_allocation(
        &self,
        company_id: CompanyId,
        id: AllocationId,
    ) -> Result<PaymentAllocation, StoreError> {
        let row = payment_allocations::Entity::find_by_id(id.into_inner())
            .one(self.txn)
            .await
            .map_err(|e| db_error(ALLOCATION, e))?;
        self.allocation_or_missing(company_id, id, row).await
    }

    /// Locks an allocation with `FOR UPDATE`.
    pub async fn lock_allocation(
        &self,
        company_id: CompanyId,
        id: AllocationId,
    ) -> Result<PaymentAllocation, StoreError> {
        let row = payment_allocations::Entity::find_by_id(id.into_inner())
            .lock_exclusive()
            .one(self.txn)
            .await
            .map_err(|e| db_error(ALLOCATION, e))?;
        self.allocation_or_missing(company_id, id, row).await
    }

    /// Locks a payment's active allocations, in id order.
    pub async fn lock_active_allocations(
        &self,
        company_id: CompanyId,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        let rows = payment_allocations::Entity::find()
            .filter(payment_allocations::Column::CompanyId.eq(company_id.into_inner()))
            .filter(payment_allocations::Column::PaymentId.eq(payment_id.into_inner()))
            .filter(payment_allocations::Column::Status.eq(AllocationStatus::Active.as_str()))
            .order_by_asc(payment_allocations::Column::Id)
            .lock_exclusive()
            .all(self.txn)
            .await
            .map_err(|e| db_error(ALLOCATION, e))?;

        rows.into_iter().map(to_allocation).collect()
    }

    /// Inserts a new allocation row.
    pub async fn insert_allocation(&self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        let row = payment_allocations::ActiveModel {
            id: Set(allocation.id.into_inner()),
            company_id: Set(allocation.company_id.into_inner()),
            payment_id: Set(allocation.payment_id.into_inner()),
            invoice_id: Set(allocation.invoice_id.into_inner()),
            amount: Set(allocation.amount),
            status: Set(allocation.status.as_str().to_string()),
            created_by: Set(allocation.created_by.into_inner()),
            created_at: Set(stamp(allocation.created_at)),
            reversed_by: Set(allocation.reversed_by.map(UserId::into_inner)),
            reversed_at: Set(allocation.reversed_at.map(stamp)),
        };
        row.insert(self.txn).await.map_err(|e| db_error(ALLOCATION, e))?;
        Ok(())
    }

    /// Writes the reversal fields of a locked allocation.
    pub async fn save_allocation(&self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        let row = payment_allocations::ActiveModel {
            id: Set(allocation.id.into_inner()),
            status: Set(allocation.status.as_str().to_string()),
            reversed_by: Set(allocation.reversed_by.map(UserId::into_inner)),
            reversed_at: Set(allocation.reversed_at.map(stamp)),
            ..Default::default()
        };
        row.update(self.txn).await.map_err(|e| db_error(ALLOCATION, e))?;
        Ok(())
    }

    async fn allocation_or_missing(
        &self,
        company_id: CompanyId,
        id: AllocationId,
        row: Option<payment_allocations::Model>,
    ) -> Result<PaymentAllocation, StoreError> {
        match row {
            Some(row) => to_allocation(row),
            None => Err(missing(self.txn, ALLOCATION, "payment_allocations", id.into_inner(), company_id).await),
        }
    }
}

fn to_payment(row: payments::Model) -> Result<Payment, StoreError> {
    Ok(Payment {
        id: PaymentId::from_uuid(row.id),
        company_id: CompanyId::from_uuid(row.company_id),
        customer_id: CustomerId::from_uuid(row.customer_id),
        payment_date: row.payment_date,
        currency: currency(&row.currency)?,
        amount: row.amount,
        allocated: row.allocated,
        status: decode(&row.status)?,
        method: row.method,
        reference: row.reference,
        journal_entry_id: row.journal_entry_id.map(JournalEntryId::from_uuid),
        created_by: UserId::from_uuid(row.created_by),
        created_at: utc(row.created_at),
        updated_at: utc(row.updated_at),
        reversed_at: row.reversed_at.map(utc),
    })
}

fn to_allocation(row: payment_allocations::Model) -> Result<PaymentAllocation, StoreError> {
    Ok(PaymentAllocation {
        id: AllocationId::from_uuid(row.id),
        company_id: CompanyId::from_uuid(row.company_id),
        payment_id: PaymentId::from_uuid(row.payment_id),
        invoice_id: InvoiceId::from_uuid(row.invoice_id),
        amount: row.amount,
        status: decode(&row.status)?,
        created_by: UserId::from_uuid(row.created_by),
        created_at: utc(row.created_at),
        reversed_by: row.reversed_by.map(UserId::from_uuid),
        reversed_at: row.reversed_at.map(utc),
    })
}
