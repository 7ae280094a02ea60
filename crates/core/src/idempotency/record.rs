//! Idempotency records and the state machine that governs them.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::config::IdempotencyConfig;
use tally_shared::types::CompanyId;
use tally_shared::{ErrorBody, ErrorKind};
use uuid::Uuid;

use super::error::IdempotencyError;

/// Longest accepted idempotency key.
pub const MAX_KEY_LEN: usize = 255;

/// A validated client-supplied idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validates a raw key: 1 to 255 printable ASCII characters, no spaces.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` otherwise.
    pub fn parse(raw: &str) -> Result<Self, IdempotencyError> {
        if raw.is_empty() || raw.len() > MAX_KEY_LEN || !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(IdempotencyError::InvalidKey { max: MAX_KEY_LEN });
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The uniqueness scope of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyScope {
    /// Owning company.
    pub company_id: CompanyId,
    /// Command name.
    pub command: String,
    /// Client key.
    pub key: IdempotencyKey,
}

impl IdempotencyScope {
    /// Creates a scope.
    #[must_use]
    pub fn new(company_id: CompanyId, command: impl Into<String>, key: IdempotencyKey) -> Self {
        Self {
            company_id,
            command: command.into(),
            key,
        }
    }
}

/// Record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Held by a worker.
    InProgress,
    /// Finished; result stored.
    Completed,
    /// Finished with an error.
    Failed,
}

impl IdempotencyStatus {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown idempotency status: {other}")),
        }
    }
}

/// Timing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    /// How long an `in_progress` lease is honoured.
    pub lease_timeout: TimeDelta,
    /// How long a record is kept after it was (re)started.
    pub retention: TimeDelta,
    /// How many times a busy key is re-checked before giving up.
    pub wait_attempts: u32,
    /// Pause between re-checks.
    pub wait_interval: std::time::Duration,
    /// Whether a failed key may execute again.
    pub retry_failed: bool,
}

impl From<&IdempotencyConfig> for IdempotencyPolicy {
    fn from(config: &IdempotencyConfig) -> Self {
        Self {
            lease_timeout: seconds(config.lease_timeout_secs),
            retention: seconds(config.retention_hours.saturating_mul(3600)),
            wait_attempts: config.wait_attempts,
            wait_interval: std::time::Duration::from_millis(config.wait_interval_ms),
            retry_failed: config.retry_failed,
        }
    }
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn after(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self::from(&IdempotencyConfig::default())
    }
}

/// Exclusive right to execute a command for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The held scope.
    pub scope: IdempotencyScope,
    /// Fencing token; completion must present it.
    pub token: Uuid,
    /// When another caller may reclaim the record.
    pub locked_until: DateTime<Utc>,
}

/// A stored idempotency record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Uniqueness scope.
    pub scope: IdempotencyScope,
    /// Status.
    pub status: IdempotencyStatus,
    /// Fingerprint of the parameters that first used the key.
    pub fingerprint: String,
    /// Current fencing token.
    pub lease_token: Uuid,
    /// Lease expiry.
    pub locked_until: DateTime<Utc>,
    /// Serialized result, once completed.
    pub result: Option<String>,
    /// Error body, once failed.
    pub error: Option<ErrorBody>,
    /// Number of executions started.
    pub attempts: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
    /// After this the record is purged and the key may run again.
    pub expires_at: DateTime<Utc>,
}

/// Why a non-fresh record was handed to a new caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// The last execution failed and failures are retryable.
    PreviousFailure,
    /// The holder's lease ran out.
    LeaseExpired,
    /// The record outlived its retention window.
    Expired,
}

/// What to do with an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Return the stored result.
    Replay(String),
    /// Return the stored failure.
    ReplayFailure(ErrorBody),
    /// Another worker holds a live lease.
    Busy {
        /// Lease expiry.
        locked_until: DateTime<Utc>,
    },
    /// Hand the record to the caller.
    Reclaim(ReclaimReason),
    /// Same key, different parameters.
    Mismatch,
}

/// Outcome of `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The caller holds the lease and must execute.
    Fresh(Lease),
    /// Another worker holds the lease.
    InProgress {
        /// Lease expiry.
        locked_until: DateTime<Utc>,
    },
    /// Stored result to replay.
    Completed(String),
    /// Stored failure to replay.
    Failed(ErrorBody),
    /// The key was used with different parameters.
    Mismatch,
}

/// Decides what an existing record means for a new caller.
#[must_use]
pub fn evaluate(
    record: &IdempotencyRecord,
    fingerprint: &str,
    now: DateTime<Utc>,
    policy: &IdempotencyPolicy,
) -> Disposition {
    let lease_live = record.status == IdempotencyStatus::InProgress && record.locked_until > now;

    if record.expires_at <= now && !lease_live {
        return Disposition::Reclaim(ReclaimReason::Expired);
    }
    if record.fingerprint != fingerprint {
        return Disposition::Mismatch;
    }

    match record.status {
        IdempotencyStatus::InProgress if lease_live => Disposition::Busy {
            locked_until: record.locked_until,
        },
        IdempotencyStatus::InProgress => Disposition::Reclaim(ReclaimReason::LeaseExpired),
        IdempotencyStatus::Completed => Disposition::Replay(record.result.clone().unwrap_or_default()),
        IdempotencyStatus::Failed if policy.retry_failed => {
            Disposition::Reclaim(ReclaimReason::PreviousFailure)
        }
        IdempotencyStatus::Failed => Disposition::ReplayFailure(record.error.clone().unwrap_or_else(|| {
            ErrorBody::new(ErrorKind::InternalError, "The original request failed")
        })),
    }
}

impl IdempotencyRecord {
    /// Creates a new `in_progress` record and its lease.
    #[must_use]
    pub fn start(
        scope: IdempotencyScope,
        fingerprint: &str,
        now: DateTime<Utc>,
        policy: &IdempotencyPolicy,
    ) -> (Self, Lease) {
        let record = Self {
            scope,
            status: IdempotencyStatus::InProgress,
            fingerprint: fingerprint.to_string(),
            lease_token: Uuid::new_v4(),
            locked_until: after(now, policy.lease_timeout),
            result: None,
            error: None,
            attempts: 1,
            created_at: now,
            updated_at: now,
            expires_at: after(now, policy.retention),
        };
        let lease = record.lease();
        (record, lease)
    }

    /// Returns the lease currently described by the record.
    #[must_use]
    pub fn lease(&self) -> Lease {
        Lease {
            scope: self.scope.clone(),
            token: self.lease_token,
            locked_until: self.locked_until,
        }
    }

    /// Applies [`evaluate`] to an existing record.
    ///
    /// On reclaim the record is reset to `in_progress` under a new token and
    /// must be persisted by the caller; otherwise it is left untouched.
    pub fn admit(&mut self, fingerprint: &str, now: DateTime<Utc>, policy: &IdempotencyPolicy) -> BeginOutcome {
        match evaluate(self, fingerprint, now, policy) {
            Disposition::Replay(result) => BeginOutcome::Completed(result),
            Disposition::ReplayFailure(error) => BeginOutcome::Failed(error),
            Disposition::Busy { locked_until } => BeginOutcome::InProgress { locked_until },
            Disposition::Mismatch => BeginOutcome::Mismatch,
            Disposition::Reclaim(reason) => BeginOutcome::Fresh(self.reclaim(fingerprint, now, policy, reason)),
        }
    }

    fn reclaim(
        &mut self,
        fingerprint: &str,
        now: DateTime<Utc>,
        policy: &IdempotencyPolicy,
        reason: ReclaimReason,
    ) -> Lease {
        if reason == ReclaimReason::Expired {
            self.created_at = now;
            self.attempts = 0;
        }
        self.status = IdempotencyStatus::InProgress;
        self.fingerprint = fingerprint.to_string();
        self.lease_token = Uuid::new_v4();
        self.locked_until = after(now, policy.lease_timeout);
        self.result = None;
        self.error = None;
        self.attempts += 1;
        self.updated_at = now;
        self.expires_at = after(now, policy.retention);
        self.lease()
    }

    /// Marks the record completed if `token` still holds it.
    ///
    /// Returns false when the lease was lost.
    pub fn complete(&mut self, token: Uuid, result: &str, now: DateTime<Utc>) -> bool {
        if !self.is_held_by(token) {
            return false;
        }
        self.status = IdempotencyStatus::Completed;
        self.result = Some(result.to_string());
        self.updated_at = now;
        true
    }

    /// Marks the record failed if `token` still holds it.
    ///
    /// Returns false when the lease was lost.
    pub fn fail(&mut self, token: Uuid, error: &ErrorBody, now: DateTime<Utc>) -> bool {
        if !self.is_held_by(token) {
            return false;
        }
        self.status = IdempotencyStatus::Failed;
        self.error = Some(error.clone());
        self.updated_at = now;
        true
    }

    /// Returns true if the record is `in_progress` under `token`.
    #[must_use]
    pub fn is_held_by(&self, token: Uuid) -> bool {
        self.status == IdempotencyStatus::InProgress && self.lease_token == token
    }

    /// Returns true if the record may be purged at `now`.
    #[must_use]
    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now && !(self.status == IdempotencyStatus::InProgress && self.locked_until > now)
    }
}
