//! Database layer with `SeaORM` entities, migrations and the PostgreSQL
//! command store.
//!
//! This crate provides:
//! - `SeaORM` entity definitions
//! - Migrations, including row-level security policies
//! - Tenant sessions that bind the company context per transaction
//! - Repositories and [`PgStore`], which implements the core storage ports

pub mod entities;
pub mod migration;
pub mod repositories;
pub mod rls;
pub mod store;

pub use store::{PgStore, PgUnit};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tally_shared::config::DatabaseConfig;

/// Establishes a pooled connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .sqlx_logging(false);
    Database::connect(options).await
}
