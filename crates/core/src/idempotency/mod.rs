//! Idempotency ledger.
//!
//! Each `(company, command, key)` triple owns one [`IdempotencyRecord`]. The
//! record moves `in_progress -> completed | failed`, and the first caller to
//! insert it holds a [`Lease`]. Storage adapters perform the atomic
//! insert-if-absent and row locking; the state machine itself lives here so
//! every adapter decides identically.
//!
//! Reclaim policy: an `in_progress` record whose lease has expired is handed
//! to the next caller with a fresh lease token. Completion is fenced on that
//! token inside the business transaction, so a stalled worker that resumes
//! after losing its lease cannot commit.

mod error;
mod fingerprint;
mod record;

pub use error::IdempotencyError;
pub use fingerprint::fingerprint;
pub use record::{
    BeginOutcome, Disposition, IdempotencyKey, IdempotencyPolicy, IdempotencyRecord, IdempotencyScope,
    IdempotencyStatus, Lease, ReclaimReason, evaluate,
};
