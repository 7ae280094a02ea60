//! Command handler contract and registry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use super::error::CommandError;
use crate::authz::{Capability, Decision, Role, authorize};
use crate::context::OperationContext;
use crate::store::UnitOfWork;

/// A named command with typed parameters.
///
/// `Params` is parsed from the request's parameter map and checked with its
/// `validator` rules before the handler is authorized or executed.
#[async_trait]
pub trait Command<U: UnitOfWork>: Send + Sync + 'static {
    /// Typed parameters.
    type Params: DeserializeOwned + Validate + Send + Sync + 'static;

    /// Name in the flat command namespace, e.g. `payment.allocate`.
    const NAME: &'static str;

    /// Capability the actor's role must grant.
    const CAPABILITY: Capability;

    /// Decides whether the actor may run this command.
    fn authorize(&self, ctx: &OperationContext, role: Option<Role>, _params: &Self::Params) -> Decision {
        authorize(&ctx.actor, &ctx.tenant, role, Self::CAPABILITY)
    }

    /// Runs the command body inside `uow`.
    ///
    /// The returned object must carry a string `id`.
    async fn execute(&self, uow: &mut U, ctx: &OperationContext, params: Self::Params) -> Result<Value, CommandError>;
}

/// Parameters that passed a handler's `validate` step.
pub struct ValidatedParams(Box<dyn Any + Send + Sync>);

impl ValidatedParams {
    fn downcast<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    fn into_inner<T: 'static>(self) -> Result<T, CommandError> {
        self.0
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| CommandError::Internal("validated parameters belong to another command".to_string()))
    }
}

impl std::fmt::Debug for ValidatedParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValidatedParams(..)")
    }
}

/// Object-safe form of [`Command`] used by the registry.
#[async_trait]
pub trait CommandHandler<U: UnitOfWork>: Send + Sync {
    /// Command name.
    fn name(&self) -> &'static str;

    /// Parses and validates raw parameters.
    fn validate(&self, params: &Value) -> Result<ValidatedParams, CommandError>;

    /// Decides whether the actor may run the command.
    fn authorize(&self, ctx: &OperationContext, role: Option<Role>, params: &ValidatedParams) -> Decision;

    /// Runs the command body.
    async fn execute(
        &self,
        uow: &mut U,
        ctx: &OperationContext,
        params: ValidatedParams,
    ) -> Result<Value, CommandError>;
}

struct Registered<C>(C);

#[async_trait]
impl<U, C> CommandHandler<U> for Registered<C>
where
    U: UnitOfWork,
    C: Command<U>,
{
    fn name(&self) -> &'static str {
        C::NAME
    }

    fn validate(&self, params: &Value) -> Result<ValidatedParams, CommandError> {
        let parsed: C::Params = serde_json::from_value(params.clone()).map_err(|e| CommandError::malformed(&e))?;
        parsed.validate()?;
        Ok(ValidatedParams(Box::new(parsed)))
    }

    fn authorize(&self, ctx: &OperationContext, role: Option<Role>, params: &ValidatedParams) -> Decision {
        match params.downcast::<C::Params>() {
            Some(params) => self.0.authorize(ctx, role, params),
            None => Decision::Deny(format!("Parameters were not validated for {}", C::NAME)),
        }
    }

    async fn execute(
        &self,
        uow: &mut U,
        ctx: &OperationContext,
        params: ValidatedParams,
    ) -> Result<Value, CommandError> {
        let params = params.into_inner::<C::Params>()?;
        self.0.execute(uow, ctx, params).await
    }
}

/// Maps command names to handlers.
pub struct CommandRegistry<U> {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler<U>>>,
}

impl<U: UnitOfWork + 'static> CommandRegistry<U> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a command under its `NAME`, replacing any previous handler.
    pub fn register<C: Command<U>>(&mut self, command: C) -> &mut Self {
        if self.handlers.insert(C::NAME, Arc::new(Registered(command))).is_some() {
            tracing::warn!(command = C::NAME, "Command handler replaced");
        }
        self
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler<U>>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl<U: UnitOfWork + 'static> Default for CommandRegistry<U> {
    fn default() -> Self {
        Self::new()
    }
}
