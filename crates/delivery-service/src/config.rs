//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ServiceError;

/// Which event and query store implementation the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `STORE_BACKEND`: `memory` or `postgres` (default: `memory`)
/// - `DATABASE_URL`: required for the `postgres` backend
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `CATCH_UP_INTERVAL_MS`: how often the event log is re-read for events
///   written by other processes (default: `5000`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub catch_up_interval: Duration,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            store_backend: parse_or(&lookup, "STORE_BACKEND", defaults.store_backend),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.database_max_connections),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_or(&lookup, "LOG_FORMAT", defaults.log_format),
            catch_up_interval: lookup("CATCH_UP_INTERVAL_MS")
                .and_then(|ms| ms.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.catch_up_interval),
        };

        if config.store_backend == StoreBackend::Postgres && config.database_url.is_none() {
            return Err(ServiceError::Configuration(
                "DATABASE_URL is required when STORE_BACKEND=postgres".to_string(),
            ));
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_connections: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            catch_up_interval: Duration::from_secs(5),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr<Err = String>,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.parse().unwrap_or(default)
}
