//! Ledger domain types for journal entry posting and voiding.
//!
//! Drafts are what callers submit; [`JournalEntry`] is what the ledger
//! persists. A posted entry is never edited: a void creates a counter-entry
//! and only flips the original's status.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{
    AccountId, CompanyId, Currency, InvoiceId, JournalEntryId, JournalLineId, PaymentId, UserId,
};

/// Account classification in the chart of accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Things the company owns.
    Asset,
    /// Things the company owes.
    Liability,
    /// Owners' residual interest.
    Equity,
    /// Income.
    Revenue,
    /// Costs.
    Expense,
}

impl AccountType {
    /// Returns true for debit-normal accounts (asset, expense).
    #[must_use]
    pub const fn is_debit_normal(self) -> bool {
        matches!(self, Self::Asset | Self::Expense)
    }

    /// Calculates the balance change for a line posted to an account of this type.
    ///
    /// - Asset/Expense: `debit - credit`
    /// - Liability/Equity/Revenue: `credit - debit`
    #[must_use]
    pub fn balance_change(self, debit: Decimal, credit: Decimal) -> Decimal {
        if self.is_debit_normal() {
            debit - credit
        } else {
            credit - debit
        }
    }

    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(Self::Asset),
            "liability" => Ok(Self::Liability),
            "equity" => Ok(Self::Equity),
            "revenue" => Ok(Self::Revenue),
            "expense" => Ok(Self::Expense),
            other => Err(format!("Unknown account type: {other}")),
        }
    }
}

/// A chart-of-accounts row with its running balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID.
    pub id: AccountId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Account code (e.g. `1200`).
    pub code: String,
    /// Display name.
    pub name: String,
    /// Classification.
    pub account_type: AccountType,
    /// Whether new postings may reference the account.
    pub is_active: bool,
    /// Running balance in the account's normal direction.
    pub balance: Decimal,
    /// Incremented on every balance change.
    pub version: i64,
}

/// What produced a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntrySource {
    /// Posted directly with `journal.post`.
    Manual,
    /// Posted when an invoice was created.
    Invoice(InvoiceId),
    /// Posted when a payment was recorded.
    Payment(PaymentId),
    /// Counter-entry voiding another entry.
    Void(JournalEntryId),
}

impl EntrySource {
    /// Returns the storage discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Invoice(_) => "invoice",
            Self::Payment(_) => "payment",
            Self::Void(_) => "void",
        }
    }

    /// Returns the referenced record, if any.
    #[must_use]
    pub fn reference_id(&self) -> Option<uuid::Uuid> {
        match self {
            Self::Manual => None,
            Self::Invoice(id) => Some(id.0),
            Self::Payment(id) => Some(id.0),
            Self::Void(id) => Some(id.0),
        }
    }

    /// Rebuilds a source from its storage representation.
    #[must_use]
    pub fn from_parts(kind: &str, reference: Option<uuid::Uuid>) -> Option<Self> {
        match (kind, reference) {
            ("manual", _) => Some(Self::Manual),
            ("invoice", Some(id)) => Some(Self::Invoice(InvoiceId(id))),
            ("payment", Some(id)) => Some(Self::Payment(PaymentId(id))),
            ("void", Some(id)) => Some(Self::Void(JournalEntryId(id))),
            _ => None,
        }
    }
}

/// Journal entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    /// Posted and counted in balances.
    Posted,
    /// Cancelled by a counter-entry; retained.
    Voided,
}

impl JournalStatus {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Posted => "posted",
            Self::Voided => "voided",
        }
    }
}

impl std::str::FromStr for JournalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posted" => Ok(Self::Posted),
            "voided" => Ok(Self::Voided),
            other => Err(format!("Unknown journal status: {other}")),
        }
    }
}

/// One line of a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalLineDraft {
    /// Account to post to.
    pub account_id: AccountId,
    /// Debit amount (zero if the line is a credit).
    pub debit: Decimal,
    /// Credit amount (zero if the line is a debit).
    pub credit: Decimal,
    /// Optional line memo.
    pub memo: Option<String>,
}

impl JournalLineDraft {
    /// Creates a debit line.
    #[must_use]
    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            memo: None,
        }
    }

    /// Creates a credit line.
    #[must_use]
    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            memo: None,
        }
    }

    /// Attaches a memo.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Input for posting a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntryDraft {
    /// Accounting date.
    pub entry_date: NaiveDate,
    /// Description.
    pub description: String,
    /// External reference (e.g. document number).
    pub reference: Option<String>,
    /// Producer of the entry.
    pub source: EntrySource,
    /// Ordered lines.
    pub lines: Vec<JournalLineDraft>,
}

/// Debit and credit totals of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryTotals {
    /// Sum of debits.
    pub debit: Decimal,
    /// Sum of credits.
    pub credit: Decimal,
}

impl EntryTotals {
    /// Returns true if debits equal credits.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.debit == self.credit
    }
}

/// A persisted journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    /// Line ID.
    pub id: JournalLineId,
    /// 1-based position within the entry.
    pub line_no: i32,
    /// Account posted to.
    pub account_id: AccountId,
    /// Debit amount.
    pub debit: Decimal,
    /// Credit amount.
    pub credit: Decimal,
    /// Line memo.
    pub memo: Option<String>,
}

/// A persisted journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Entry ID.
    pub id: JournalEntryId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Accounting date.
    pub entry_date: NaiveDate,
    /// Description.
    pub description: String,
    /// External reference.
    pub reference: Option<String>,
    /// Currency of every line (the company's base currency).
    pub currency: Currency,
    /// Producer of the entry.
    pub source: EntrySource,
    /// Lifecycle status.
    pub status: JournalStatus,
    /// Sum of debits (equal to the sum of credits).
    pub total: Decimal,
    /// Ordered lines.
    pub lines: Vec<JournalLine>,
    /// Counter-entry that voided this one.
    pub voided_by: Option<JournalEntryId>,
    /// Reason given when voiding.
    pub void_reason: Option<String>,
    /// When the entry was voided.
    pub voided_at: Option<DateTime<Utc>>,
    /// Actor that posted the entry.
    pub created_by: UserId,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Recomputes the totals from the lines.
    #[must_use]
    pub fn totals(&self) -> EntryTotals {
        self.lines.iter().fold(EntryTotals::default(), |acc, line| EntryTotals {
            debit: acc.debit + line.debit,
            credit: acc.credit + line.credit,
        })
    }
}

/// Result of voiding an entry.
#[derive(Debug, Clone)]
pub struct VoidOutcome {
    /// The original entry, now voided.
    pub original: JournalEntry,
    /// The counter-entry.
    pub reversal: JournalEntry,
}
