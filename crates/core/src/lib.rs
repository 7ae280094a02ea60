//! Core business logic for Tally.
//!
//! This crate contains the command dispatcher and the financial rules it
//! enforces, with ZERO web or database dependencies. Storage is reached
//! through the port traits in [`store`].
//!
//! # Modules
//!
//! - `command` - Registry, handler contract and the idempotent dispatcher
//! - `commands` - Built-in invoice, payment and journal commands
//! - `ledger` - Double-entry posting, voiding and balance rules
//! - `billing` - Invoices, payments and payment allocation
//! - `idempotency` - Idempotency keys, fingerprints and the record state machine
//! - `tenant` - Tenant resolution and ownership checks
//! - `authz` - Roles and capabilities
//! - `audit` - Audit entries and parameter sanitisation
//! - `store` - Storage ports implemented by the database crate

pub mod audit;
pub mod authz;
pub mod billing;
pub mod command;
pub mod commands;
pub mod context;
pub mod idempotency;
pub mod ledger;
pub mod store;
pub mod tenant;

#[cfg(test)]
mod memory;

pub use command::{CommandRequest, DispatchOutcome, Dispatcher};
pub use commands::default_registry;
