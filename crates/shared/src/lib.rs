//! Shared types, errors, and configuration for Tally.
//!
//! This crate provides common types used across all other crates:
//! - Currencies with minor-unit precision
//! - Typed IDs for type-safe entity references
//! - The wire error taxonomy returned by the command dispatcher
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{ErrorBody, ErrorKind, FieldErrors};
