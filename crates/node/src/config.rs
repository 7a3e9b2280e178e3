//! Process configuration loaded from environment variables.

use std::net::SocketAddr;

use deadlines::SchedulerConfig;
use rental::RentalPolicy;
use runtime::RuntimeConfig;

/// How log lines are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a `LOG_FORMAT` value; anything but `json` is pretty.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — PostgreSQL connection string; events stay in memory when unset
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `5`)
/// - `METRICS_ADDR` — Prometheus scrape listener (default: `"0.0.0.0:9000"`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `pretty` or `json` (default: `pretty`)
///
/// plus the variables read by [`RuntimeConfig`], [`SchedulerConfig`] and
/// [`RentalPolicy`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub metrics_addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
    pub runtime: RuntimeConfig,
    pub scheduler: SchedulerConfig,
    pub rental: RentalPolicy,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.database_max_connections),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.metrics_addr),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            runtime: RuntimeConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            rental: RentalPolicy::from_env(),
        }
    }

    /// Returns true if events are kept in PostgreSQL.
    pub fn is_durable(&self) -> bool {
        self.database_url.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 5,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            runtime: RuntimeConfig::default(),
            scheduler: SchedulerConfig::default(),
            rental: RentalPolicy::default(),
        }
    }
}
