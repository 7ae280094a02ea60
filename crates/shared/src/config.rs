//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Idempotency ledger configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Audit trail configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Idempotency ledger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a key is remembered after it was first seen.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// How long an `in_progress` lease is honoured before it can be reclaimed.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// How many times `begin` re-checks a key held by another worker.
    #[serde(default = "default_wait_attempts")]
    pub wait_attempts: u32,
    /// Pause between re-checks.
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
    /// Whether a failed key may be executed again.
    #[serde(default = "default_retry_failed")]
    pub retry_failed: bool,
}

fn default_retention_hours() -> u64 {
    24
}

fn default_lease_timeout_secs() -> u64 {
    30
}

fn default_wait_attempts() -> u32 {
    5
}

fn default_wait_interval_ms() -> u64 {
    200
}

fn default_retry_failed() -> bool {
    true
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            lease_timeout_secs: default_lease_timeout_secs(),
            wait_attempts: default_wait_attempts(),
            wait_interval_ms: default_wait_interval_ms(),
            retry_failed: default_retry_failed(),
        }
    }
}

/// Audit trail configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Parameter keys whose values are replaced before an entry is stored.
    #[serde(default = "default_redacted_keys")]
    pub redacted_keys: Vec<String>,
}

fn default_redacted_keys() -> Vec<String> {
    ["password", "secret", "token", "card_number", "cvv", "account_number"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            redacted_keys: default_redacted_keys(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "tally=info,sea_orm=warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
