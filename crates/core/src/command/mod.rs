//! Command dispatch: registry, handler contract and the dispatcher.

mod dispatcher;
mod error;
mod handler;

pub use dispatcher::{CommandRequest, DispatchOutcome, Dispatcher};
pub use error::CommandError;
pub use handler::{Command, CommandHandler, CommandRegistry, ValidatedParams};

#[cfg(test)]
mod dispatcher_tests;
