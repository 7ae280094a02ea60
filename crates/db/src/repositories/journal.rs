//! Journal entries and their lines.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tally_core::ledger::{EntrySource, JournalEntry, JournalLine};
use tally_core::store::StoreError;
use tally_shared::types::{AccountId, CompanyId, JournalEntryId, JournalLineId, UserId};

use super::{currency, db_error, decode, missing, stamp, utc};
use crate::entities::{journal_entries, journal_lines};

const ENTITY: &str = "journal_entry";
const TABLE: &str = "journal_entries";

/// Journal repository bound to one tenant transaction.
#[derive(Debug, Clone, Copy)]
pub struct JournalRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> JournalRepository<'a> {
    /// Creates a repository over `txn`.
    #[must_use]
    pub const fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }

    /// Inserts the header, then each line in order.
    pub async fn insert(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let header = journal_entries::ActiveModel {
            id: Set(entry.id.into_inner()),
            company_id: Set(entry.company_id.into_inner()),
            entry_date: Set(entry.entry_date),
            description: Set(entry.description.clone()),
            reference: Set(entry.reference.clone()),
            currency: Set(entry.currency.code().to_string()),
            source_type: Set(entry.source.kind().to_string()),
            source_id: Set(entry.source.reference_id()),
            status: Set(entry.status.as_str().to_string()),
            total: Set(entry.total),
            voided_by: Set(entry.voided_by.map(JournalEntryId::into_inner)),
            void_reason: Set(entry.void_reason.clone()),
            voided_at: Set(entry.voided_at.map(stamp)),
            created_by: Set(entry.created_by.into_inner()),
            created_at: Set(stamp(entry.created_at)),
        };
        header.insert(self.txn).await.map_err(|e| db_error(ENTITY, e))?;

        for line in &entry.lines {
            let row = journal_lines::ActiveModel {
                id: Set(line.id.into_inner()),
                company_id: Set(entry.company_id.into_inner()),
                journal_entry_id: Set(entry.id.into_inner()),
                line_no: Set(line.line_no),
                account_id: Set(line.account_id.into_inner()),
                debit: Set(line.debit),
                credit: Set(line.credit),
                memo: Set(line.memo.clone()),
            };
            row.insert(self.txn).await.map_err(|e| db_error(ENTITY, e))?;
        }
        Ok(())
    }

    /// Locks an entry with `FOR UPDATE` and loads its lines.
    pub async fn lock(&self, company_id: CompanyId, id: JournalEntryId) -> Result<JournalEntry, StoreError> {
        let header = journal_entries::Entity::find_by_id(id.into_inner())
            .lock_exclusive()
            .one(self.txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;
        let Some(header) = header else {
            return Err(missing(self.txn, ENTITY, TABLE, id.into_inner(), company_id).await);
        };

        let lines = journal_lines::Entity::find()
            .filter(journal_lines::Column::JournalEntryId.eq(header.id))
            .order_by_asc(journal_lines::Column::LineNo)
            .all(self.txn)
            .await
            .map_err(|e| db_error(ENTITY, e))?;

        to_entry(header, lines)
    }

    /// Writes the void fields of a locked entry.
    pub async fn save_void(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let row = journal_entries::ActiveModel {
            id: Set(entry.id.into_inner()),
            status: Set(entry.status.as_str().to_string()),
            voided_by: Set(entry.voided_by.map(JournalEntryId::into_inner)),
            void_reason: Set(entry.void_reason.clone()),
            voided_at: Set(entry.voided_at.map(stamp)),
            ..Default::default()
        };
        row.update(self.txn).await.map_err(|e| db_error(ENTITY, e))?;
        Ok(())
    }
}

fn to_entry(header: journal_entries::Model, lines: Vec<journal_lines::Model>) -> Result<JournalEntry, StoreError> {
    let source = EntrySource::from_parts(&header.source_type, header.source_id).ok_or_else(|| {
        StoreError::Database(format!(
            "Journal entry {} has an invalid source {}",
            header.id, header.source_type
        ))
    })?;

    Ok(JournalEntry {
        id: JournalEntryId::from_uuid(header.id),
        company_id: CompanyId::from_uuid(header.company_id),
        entry_date: header.entry_date,
        description: header.description,
        reference: header.reference,
        currency: currency(&header.currency)?,
        source,
        status: decode(&header.status)?,
        total: header.total,
        lines: lines
            .into_iter()
            .map(|line| JournalLine {
                id: JournalLineId::from_uuid(line.id),
                line_no: line.line_no,
                account_id: AccountId::from_uuid(line.account_id),
                debit: line.debit,
                credit: line.credit,
                memo: line.memo,
            })
            .collect(),
        voided_by: header.voided_by.map(JournalEntryId::from_uuid),
        void_reason: header.void_reason,
        voided_at: header.voided_at.map(utc),
        created_by: UserId::from_uuid(header.created_by),
        created_at: utc(header.created_at),
    })
}
