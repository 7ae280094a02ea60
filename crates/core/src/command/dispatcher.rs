//! The single entry point for mutating commands.
//!
//! One invocation walks `received -> idempotency check -> execute ->
//! commit | rollback -> record result -> respond`:
//!
//! 1. The tenant candidate is resolved and the handler looked up.
//! 2. The idempotency ledger is consulted. A stored result is replayed
//!    without touching the handler; a busy key is re-checked a few times and
//!    then reported as `Conflict`.
//! 3. Parameters are validated, the actor's role is checked, and the handler
//!    runs inside one unit of work. The idempotency record is completed in
//!    that same transaction.
//! 4. On failure the unit rolls back and the record is marked failed.
//! 5. An audit entry is appended. Audit failures are logged and swallowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tally_shared::ErrorKind;
use tally_shared::types::UserId;

use super::error::CommandError;
use super::handler::{CommandHandler, CommandRegistry, ValidatedParams};
use crate::audit::{AuditLogEntry, AuditOutcome, AuditPolicy, DomainEvent};
use crate::authz::{Actor, Decision};
use crate::context::OperationContext;
use crate::idempotency::{
    BeginOutcome, IdempotencyError, IdempotencyKey, IdempotencyPolicy, IdempotencyScope, Lease, fingerprint,
};
use crate::store::{CommandStore, StoreError, UnitOfWork};
use crate::tenant::{TenantCandidate, TenantContext};

/// One inbound command invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// Command name, e.g. `invoice.create`.
    pub command: String,
    /// Raw parameter map.
    pub params: Value,
    /// Issuing principal.
    pub actor_id: UserId,
    /// Company UUID, slug or legacy id.
    pub tenant: String,
    /// Client-supplied idempotency key.
    pub idempotency_key: String,
}

/// Result of one invocation.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The handler ran and its transaction committed.
    Executed(Value),
    /// A stored result was returned without running the handler.
    Replayed(Value),
    /// The invocation failed; nothing was applied.
    Rejected(CommandError),
}

impl DispatchOutcome {
    /// HTTP-style status.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Executed(_) | Self::Replayed(_) => 200,
            Self::Rejected(error) => error.kind().status_code(),
        }
    }

    /// The caller-facing body.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::Executed(value) | Self::Replayed(value) => value.clone(),
            Self::Rejected(error) => serde_json::to_value(error.to_body()).unwrap_or(Value::Null),
        }
    }

    /// The failure kind, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Rejected(error) => Some(error.kind()),
            _ => None,
        }
    }

    /// Returns true unless rejected.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

enum Completion {
    Executed { result: Value, events: Vec<DomainEvent> },
    Replayed(Value),
}

enum Acquired {
    Lease(Lease),
    Replay(String),
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runs registered commands against a [`CommandStore`].
pub struct Dispatcher<S: CommandStore> {
    store: Arc<S>,
    registry: CommandRegistry<S::Unit>,
    policy: IdempotencyPolicy,
    audit: AuditPolicy,
    clock: Clock,
}

impl<S: CommandStore> Dispatcher<S> {
    /// Creates a dispatcher using the system clock.
    pub fn new(store: Arc<S>, registry: CommandRegistry<S::Unit>, policy: IdempotencyPolicy, audit: AuditPolicy) -> Self {
        Self {
            store,
            registry,
            policy,
            audit,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The registry.
    pub fn registry(&self) -> &CommandRegistry<S::Unit> {
        &self.registry
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Runs one command invocation to completion.
    pub async fn dispatch(&self, request: CommandRequest) -> DispatchOutcome {
        let tenant = match self.resolve_tenant(&request.tenant).await {
            Ok(tenant) => tenant,
            Err(error) => {
                // No company, so no audit row; the log line is the only trail.
                tracing::warn!(
                    security = true,
                    tenant = %request.tenant,
                    actor_id = %request.actor_id,
                    command = %request.command,
                    idempotency_key = %request.idempotency_key,
                    code = error.kind().wire_code(),
                    error = %error,
                    "Tenant resolution rejected"
                );
                return DispatchOutcome::Rejected(error);
            }
        };

        let ctx = OperationContext::new(
            tenant,
            Actor::new(request.actor_id),
            request.idempotency_key.clone(),
            self.now(),
        );
        let result = self.run(&ctx, &request).await;
        self.record(&ctx, &request, &result).await;

        match result {
            Ok(Completion::Executed { result, .. }) => {
                tracing::info!(
                    company_id = %ctx.tenant.company_id(),
                    command = %request.command,
                    idempotency_key = %request.idempotency_key,
                    "Command executed"
                );
                DispatchOutcome::Executed(result)
            }
            Ok(Completion::Replayed(result)) => {
                tracing::info!(
                    company_id = %ctx.tenant.company_id(),
                    command = %request.command,
                    idempotency_key = %request.idempotency_key,
                    "Command replayed from idempotency ledger"
                );
                DispatchOutcome::Replayed(result)
            }
            Err(error) => {
                log_rejection(&request, &ctx.tenant, &error);
                DispatchOutcome::Rejected(error)
            }
        }
    }

    /// Deletes expired idempotency records.
    ///
    /// # Errors
    ///
    /// Returns the storage error.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let purged = self.store.purge_expired(self.now()).await?;
        tracing::info!(purged, "Expired idempotency records purged");
        Ok(purged)
    }

    async fn resolve_tenant(&self, raw: &str) -> Result<TenantContext, CommandError> {
        let candidate = TenantCandidate::parse(raw)?;
        let tenant = self.store.resolve_tenant(&candidate).await?;
        Ok(TenantContext::try_from(tenant)?)
    }

    async fn run(&self, ctx: &OperationContext, request: &CommandRequest) -> Result<Completion, CommandError> {
        let handler = self
            .registry
            .get(&request.command)
            .ok_or_else(|| CommandError::CommandNotFound(request.command.clone()))?;

        let key = IdempotencyKey::parse(&request.idempotency_key)?;
        let scope = IdempotencyScope::new(ctx.tenant.company_id(), handler.name(), key);
        let fingerprint = fingerprint(handler.name(), &request.params);

        let lease = match self.acquire(&scope, &fingerprint).await? {
            Acquired::Lease(lease) => lease,
            Acquired::Replay(stored) => {
                let result = serde_json::from_str(&stored)
                    .map_err(|e| IdempotencyError::CorruptResult(e.to_string()))?;
                return Ok(Completion::Replayed(result));
            }
        };

        match self.execute(handler.as_ref(), ctx, &request.params, &lease).await {
            Ok(completion) => Ok(completion),
            Err(error) => {
                self.release(&lease, &error).await;
                Err(error)
            }
        }
    }

    async fn acquire(&self, scope: &IdempotencyScope, fingerprint: &str) -> Result<Acquired, CommandError> {
        let attempts = self.policy.wait_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.begin(scope, fingerprint, &self.policy, self.now()).await? {
                BeginOutcome::Fresh(lease) => return Ok(Acquired::Lease(lease)),
                BeginOutcome::Completed(result) => return Ok(Acquired::Replay(result)),
                BeginOutcome::Failed(body) => return Err(CommandError::stored(body)),
                BeginOutcome::Mismatch => return Err(IdempotencyError::FingerprintMismatch.into()),
                BeginOutcome::InProgress { locked_until } => {
                    tracing::debug!(
                        company_id = %scope.company_id,
                        command = %scope.command,
                        idempotency_key = %scope.key,
                        attempt,
                        %locked_until,
                        "Idempotency key busy"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.wait_interval).await;
                    }
                }
            }
        }
        Err(IdempotencyError::InProgress.into())
    }

    async fn execute(
        &self,
        handler: &dyn CommandHandler<S::Unit>,
        ctx: &OperationContext,
        params: &Value,
        lease: &Lease,
    ) -> Result<Completion, CommandError> {
        let validated = handler.validate(params)?;
        let mut uow = self.store.begin_unit(&ctx.tenant).await?;

        let outcome = Self::run_in_unit(handler, &mut uow, ctx, validated, lease).await;

        match outcome {
            Ok(result) => {
                let events = uow.commit().await?;
                Ok(Completion::Executed { result, events })
            }
            Err(error) => {
                if let Err(rollback) = uow.rollback().await {
                    tracing::warn!(
                        company_id = %ctx.tenant.company_id(),
                        command = handler.name(),
                        error = %rollback,
                        "Rollback failed"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run_in_unit(
        handler: &dyn CommandHandler<S::Unit>,
        uow: &mut S::Unit,
        ctx: &OperationContext,
        validated: ValidatedParams,
        lease: &Lease,
    ) -> Result<Value, CommandError> {
        let role = uow.member_role(ctx.actor.id).await?;
        if let Decision::Deny(reason) = handler.authorize(ctx, role, &validated) {
            return Err(CommandError::Forbidden(reason));
        }

        let result = handler.execute(uow, ctx, validated).await?;
        if !result.get("id").is_some_and(Value::is_string) {
            return Err(CommandError::Internal(format!(
                "{} returned a result without a string id",
                handler.name()
            )));
        }

        let serialized = serde_json::to_string(&result).map_err(|e| CommandError::Internal(e.to_string()))?;
        uow.complete_idempotency(lease, &serialized).await?;
        Ok(result)
    }

    async fn release(&self, lease: &Lease, error: &CommandError) {
        if let Err(e) = self.store.fail(lease, &error.to_body(), self.now()).await {
            tracing::warn!(
                company_id = %lease.scope.company_id,
                command = %lease.scope.command,
                idempotency_key = %lease.scope.key,
                error = %e,
                "Failed to mark idempotency record failed"
            );
        }
    }

    async fn record(&self, ctx: &OperationContext, request: &CommandRequest, result: &Result<Completion, CommandError>) {
        let params = self.audit.sanitize(&request.params);
        let entries = match result {
            Ok(Completion::Executed { result, events }) => {
                let mut entries = vec![AuditLogEntry::command(
                    ctx,
                    &request.command,
                    params,
                    AuditOutcome::Succeeded,
                    Some(result.clone()),
                    None,
                )];
                entries.extend(events.iter().cloned().map(|event| AuditLogEntry::event(ctx, event)));
                entries
            }
            Ok(Completion::Replayed(result)) => vec![AuditLogEntry::command(
                ctx,
                &request.command,
                params,
                AuditOutcome::Replayed,
                Some(result.clone()),
                None,
            )],
            Err(error) => {
                let outcome = if matches!(error, CommandError::Stored { .. }) {
                    AuditOutcome::Replayed
                } else {
                    AuditOutcome::Failed
                };
                vec![AuditLogEntry::command(
                    ctx,
                    &request.command,
                    params,
                    outcome,
                    None,
                    Some(error.to_body()),
                )]
            }
        };

        for entry in &entries {
            if let Err(e) = self.store.append(entry).await {
                tracing::error!(
                    company_id = %entry.company_id,
                    action = %entry.action,
                    idempotency_key = %entry.idempotency_key,
                    error = %e,
                    "Audit append failed"
                );
            }
        }
    }
}

fn log_rejection(request: &CommandRequest, tenant: &TenantContext, error: &CommandError) {
    let company = tenant.company_id();
    match error.kind() {
        ErrorKind::TenantMismatch => tracing::warn!(
            security = true,
            company_id = %company,
            actor_id = %request.actor_id,
            command = %request.command,
            error = %error,
            "Cross-tenant access rejected"
        ),
        ErrorKind::InternalError => tracing::error!(
            company_id = %company,
            command = %request.command,
            idempotency_key = %request.idempotency_key,
            error = %error,
            "Command failed"
        ),
        kind => tracing::info!(
            company_id = %company,
            command = %request.command,
            idempotency_key = %request.idempotency_key,
            code = kind.wire_code(),
            error = %error,
            "Command rejected"
        ),
    }
}
