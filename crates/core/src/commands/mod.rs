//! Built-in command handlers.
//!
//! | Command | Capability |
//! |---|---|
//! | `invoice.create` | `manage_invoices` |
//! | `payment.create` | `manage_payments` |
//! | `payment.allocate` | `allocate_payments` |
//! | `payment.allocate.auto` | `allocate_payments` |
//! | `payment.allocation.reverse` | `reverse_transactions` |
//! | `payment.reverse` | `reverse_transactions` |
//! | `journal.post` | `post_journal` |
//! | `journal.void` | `void_journal` |
//!
//! Amounts are rendered as strings at the currency's minor-unit precision.

pub mod invoice;
pub mod journal;
pub mod payment;

use rust_decimal::Decimal;
use tally_shared::types::Currency;

pub use invoice::CreateInvoice;
pub use journal::{PostJournal, VoidJournal};
pub use payment::{AllocatePayment, AutoAllocatePayment, CreatePayment, ReverseAllocation, ReversePayment};

use crate::command::CommandRegistry;
use crate::store::UnitOfWork;

/// Registers every built-in command.
pub fn register_defaults<U: UnitOfWork + 'static>(registry: &mut CommandRegistry<U>) {
    registry
        .register(CreateInvoice)
        .register(CreatePayment)
        .register(AllocatePayment)
        .register(AutoAllocatePayment)
        .register(ReverseAllocation)
        .register(ReversePayment)
        .register(PostJournal)
        .register(VoidJournal);
}

/// A registry holding every built-in command.
#[must_use]
pub fn default_registry<U: UnitOfWork + 'static>() -> CommandRegistry<U> {
    let mut registry = CommandRegistry::new();
    register_defaults(&mut registry);
    registry
}

fn amount(currency: Currency, value: Decimal) -> String {
    currency.normalize(value).to_string()
}
