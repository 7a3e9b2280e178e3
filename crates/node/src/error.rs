//! Node error types.

use thiserror::Error;

/// Errors that stop the node from starting or shutting down cleanly.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Could not connect to PostgreSQL.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// Command registration failed.
    #[error("Runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),

    #[error("Deadline error: {0}")]
    Deadline(#[from] deadlines::DeadlineError),

    #[error("Projection error: {0}")]
    Projection(#[from] projections::ProjectionError),

    /// The Prometheus exporter could not be installed.
    #[error("Metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// A global tracing subscriber was already installed.
    #[error("Tracing setup failed: {0}")]
    Tracing(String),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
