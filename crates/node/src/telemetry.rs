//! Logging and metrics installation.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::error::{NodeError, Result};

/// Installs the global tracing subscriber.
///
/// An unparsable filter directive falls back to `info`.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| NodeError::Tracing(e.to_string()))
}

/// Installs the Prometheus recorder with a scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn install_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("commands_handled_total", "Commands that completed successfully");
    metrics::describe_counter!("commands_rejected_total", "Commands rejected by their handler");
    metrics::describe_counter!(
        "command_conflicts_total",
        "Appends that lost a race and were retried"
    );
    metrics::describe_histogram!(
        "command_duration_seconds",
        metrics::Unit::Seconds,
        "Time to handle one command, retries included"
    );
    metrics::describe_counter!("events_appended_total", "Events written to the log");
    metrics::describe_counter!("deadlines_scheduled_total", "Deadlines armed");
    metrics::describe_counter!("deadlines_fired_total", "Deadlines that came due");
    metrics::describe_counter!(
        "deadlines_dropped_total",
        "Deadlines given up on after failed deliveries"
    );
    metrics::describe_counter!(
        "projections_events_processed",
        "Events applied by each projection"
    );
}
