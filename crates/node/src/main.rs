//! Node entry point.

use event_store::{EventLog, InMemoryEventLog, PostgresEventLog};
use node::{Config, Engine, telemetry};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run<L: EventLog + Clone + 'static>(log: L, config: &Config) -> node::Result<()> {
    let engine = Engine::start(log, config).await?;
    shutdown_signal().await;
    engine.shutdown().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    telemetry::init_tracing(&config)?;

    // 2. Install Prometheus metrics recorder
    telemetry::install_metrics(config.metrics_addr)?;

    // 3. Open the event log and run until signalled
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let log = PostgresEventLog::new(pool);
            log.run_migrations().await?;
            tracing::info!("using PostgreSQL event log");
            run(log, &config).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, events are kept in memory only");
            run(InMemoryEventLog::new(), &config).await?;
        }
    }

    tracing::info!("node shut down gracefully");
    Ok(())
}
