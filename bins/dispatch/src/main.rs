//! Tally command runner.
//!
//! Usage:
//!   tally dispatch < envelope.json  - Run one command and print `{status, body}`
//!   tally purge                     - Delete expired idempotency records
//!
//! The envelope carries `command`, `params`, `actor_id`, `tenant` and
//! `idempotency_key`. Logs go to stderr so stdout stays machine readable.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tally_core::audit::AuditPolicy;
use tally_core::idempotency::IdempotencyPolicy;
use tally_core::{CommandRequest, Dispatcher, default_registry};
use tally_db::{PgStore, connect};
use tally_shared::AppConfig;
use tally_shared::config::{LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging);

    let mode = std::env::args().nth(1).unwrap_or_else(|| "dispatch".to_string());
    if mode != "dispatch" && mode != "purge" {
        bail!("Unknown mode `{mode}`, expected `dispatch` or `purge`");
    }

    let db = connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    let dispatcher = Dispatcher::new(
        Arc::new(PgStore::new(db)),
        default_registry(),
        IdempotencyPolicy::from(&config.idempotency),
        AuditPolicy::from(&config.audit),
    );

    if mode == "purge" {
        let purged = dispatcher.purge_expired().await?;
        println!("{}", json!({ "purged": purged }));
        return Ok(());
    }

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read command envelope from stdin")?;
    let request: CommandRequest = serde_json::from_str(&input).context("Invalid command envelope")?;

    let outcome = dispatcher.dispatch(request).await;
    println!("{}", json!({ "status": outcome.status(), "body": outcome.body() }));
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}
