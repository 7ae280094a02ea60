//! Invoices, payments and the payment allocation engine.

pub mod allocation;
pub mod error;
pub mod invoice;
pub mod payment;
pub mod service;

#[cfg(test)]
mod allocation_props;

pub use allocation::{AllocationRequest, AutoAllocationStrategy, PlannedAllocation, plan_auto, plan_manual};
pub use error::{AllocationError, DocumentError};
pub use invoice::{Customer, Invoice, InvoiceDraft, InvoiceLine, InvoiceLineDraft, InvoiceStatus};
pub use payment::{AllocationStatus, Payment, PaymentAllocation, PaymentDraft, PaymentStatus};
pub use service::{
    ALLOCATION_REVERSED, AllocationEngine, AllocationOutcome, AllocationReversal, PAYMENT_REVERSED, PaymentReversal,
};
