//! Chart-of-accounts rows and their running balances.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tally_core::ledger::Account;
use tally_core::store::StoreError;
use tally_shared::types::{AccountId, CompanyId};
use uuid::Uuid;

use super::{db_error, decode, stamp};
use crate::entities::chart_of_accounts;

const ENTITY: &str = "account";

/// Account repository bound to one tenant transaction.
#[derive(Debug, Clone, Copy)]
pub struct AccountRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> AccountRepository<'a> {
    /// Creates a repository over `txn`.
    #[must_use]
    pub const fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }

    /// Locks the company's accounts among `ids` with `FOR UPDATE`, in id order.
    ///
    /// Foreign and missing ids are simply absent from the result.
    pub async fn lock(&self, company_id: CompanyId, ids: &[AccountId]) -> Result<Vec<Account>, StoreError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        let rows = chart_of_accounts::Entity::find()
            .filter(chart_of_accounts::Column::CompanyId.eq(company_id.into_inner()))
            .filter(chart_of_accounts::Column::Id.is_in(ids))
            .order_by_asc(chart_of_accounts::Column::Id)
            .lock_exclusive()
            .all(self.txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        rows.into_iter().map(to_account).collect()
    }

    /// Writes the balance and version of a locked account.
    pub async fn save_balance(&self, account: &Account) -> Result<(), StoreError> {
        let row = chart_of_accounts::ActiveModel {
            id: Set(account.id.into_inner()),
            balance: Set(account.balance),
            version: Set(account.version),
            updated_at: Set(stamp(chrono::Utc::now())),
            ..Default::default()
        };
        row.update(self.txn).await.map_err(|e| db_error(ENTITY, e))?;
        Ok(())
    }
}

fn to_account(row: chart_of_accounts::Model) -> Result<Account, StoreError> {
    Ok(Account {
        id: AccountId::from_uuid(row.id),
        company_id: CompanyId::from_uuid(row.company_id),
        code: row.code,
        name: row.name,
        account_type: decode(&row.account_type)?,
        is_active: row.is_active,
        balance: row.balance,
        version: row.version,
    })
}
