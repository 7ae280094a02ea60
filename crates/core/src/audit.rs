//! Audit trail entries and parameter sanitisation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::config::AuditConfig;
use tally_shared::types::{AuditLogId, CompanyId, UserId};
use tally_shared::ErrorBody;
use uuid::Uuid;

use crate::context::OperationContext;

/// Replacement for redacted parameter values.
pub const REDACTED: &str = "[REDACTED]";

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Executed and committed.
    Succeeded,
    /// Rejected or rolled back.
    Failed,
    /// Answered from the idempotency ledger.
    Replayed,
}

impl AuditOutcome {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Replayed => "replayed",
        }
    }
}

/// A side effect worth its own audit row (e.g. an allocation reversal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    /// Event name, e.g. `payment.allocation.reversed`.
    pub action: &'static str,
    /// Affected record.
    pub entity_id: Uuid,
    /// Event payload.
    pub details: Value,
}

impl DomainEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(action: &'static str, entity_id: impl Into<Uuid>, details: Value) -> Self {
        Self {
            action,
            entity_id: entity_id.into(),
            details,
        }
    }
}

/// An append-only audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Entry ID.
    pub id: AuditLogId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Issuing principal.
    pub actor_id: UserId,
    /// Command or event name.
    pub action: String,
    /// Client key of the invocation.
    pub idempotency_key: String,
    /// Sanitised parameters (or event payload).
    pub params: Value,
    /// Success body.
    pub result: Option<Value>,
    /// Failure body.
    pub error: Option<ErrorBody>,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Timestamp.
    pub occurred_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Creates the entry for one dispatched command.
    #[must_use]
    pub fn command(
        ctx: &OperationContext,
        action: &str,
        params: Value,
        outcome: AuditOutcome,
        result: Option<Value>,
        error: Option<ErrorBody>,
    ) -> Self {
        Self {
            id: AuditLogId::new(),
            company_id: ctx.tenant.company_id(),
            actor_id: ctx.actor.id,
            action: action.to_string(),
            idempotency_key: ctx.idempotency_key.clone(),
            params,
            result,
            error,
            outcome,
            occurred_at: ctx.now,
        }
    }

    /// Creates the entry for a domain event emitted by a committed command.
    #[must_use]
    pub fn event(ctx: &OperationContext, event: DomainEvent) -> Self {
        Self {
            id: AuditLogId::new(),
            company_id: ctx.tenant.company_id(),
            actor_id: ctx.actor.id,
            action: event.action.to_string(),
            idempotency_key: ctx.idempotency_key.clone(),
            params: event.details,
            result: Some(serde_json::json!({ "id": event.entity_id.to_string() })),
            error: None,
            outcome: AuditOutcome::Succeeded,
            occurred_at: ctx.now,
        }
    }
}

/// Redaction rules applied before parameters reach the audit sink.
#[derive(Debug, Clone, Default)]
pub struct AuditPolicy {
    redacted_keys: HashSet<String>,
}

impl AuditPolicy {
    /// Creates a policy redacting the given keys (case-insensitive).
    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            redacted_keys: keys.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    /// Returns a copy of `params` with redacted values replaced, at any depth.
    #[must_use]
    pub fn sanitize(&self, params: &Value) -> Value {
        match params {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.redacted_keys.contains(&key.to_lowercase()) {
                            Value::String(REDACTED.to_string())
                        } else {
                            self.sanitize(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.sanitize(v)).collect()),
            other => other.clone(),
        }
    }
}

impl From<&AuditConfig> for AuditPolicy {
    fn from(config: &AuditConfig) -> Self {
        Self::new(&config.redacted_keys)
    }
}
