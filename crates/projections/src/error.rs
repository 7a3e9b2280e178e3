//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event log.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// Failed to decode an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A projection could not apply an event.
    #[error("Projection '{name}' failed: {reason}")]
    Projection { name: &'static str, reason: String },
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
