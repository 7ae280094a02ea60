//! Per-operation context threaded through handlers and engines.

use chrono::{DateTime, Utc};

use crate::authz::Actor;
use crate::tenant::TenantContext;

/// Everything a command body knows about the invocation it serves.
///
/// Built by the dispatcher once the tenant is resolved; dropped when the
/// invocation returns.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Active company.
    pub tenant: TenantContext,
    /// Issuing principal.
    pub actor: Actor,
    /// Client key for the invocation.
    pub idempotency_key: String,
    /// Timestamp used for every row written by the invocation.
    pub now: DateTime<Utc>,
}

impl OperationContext {
    /// Creates a context.
    #[must_use]
    pub fn new(tenant: TenantContext, actor: Actor, idempotency_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tenant,
            actor,
            idempotency_key: idempotency_key.into(),
            now,
        }
    }
}
