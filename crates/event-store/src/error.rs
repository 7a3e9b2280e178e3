use thiserror::Error;

use crate::Position;

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// An event matching the append condition was stored after the position
    /// the writer based its decision on.
    #[error(
        "Concurrency conflict: expected no matching events after {}, found one at {actual}",
        describe_expected(.expected)
    )]
    ConcurrencyConflict {
        expected: Option<Position>,
        actual: Position,
    },

    /// The batch handed to `append` was rejected before touching storage.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The log cannot currently read or durably write events.
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// The database rejected a statement or returned rows that failed to decode.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true for optimistic concurrency failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Returns true when the failure is in the storage layer itself and the
    /// operation may succeed if retried later.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EventStoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for EventStoreError {
    fn from(error: sqlx::Error) -> Self {
        let connection_lost = matches!(
            error,
            sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
        );
        if connection_lost {
            EventStoreError::Unavailable(error.to_string())
        } else {
            EventStoreError::Database(error)
        }
    }
}

fn describe_expected(expected: &Option<Position>) -> String {
    expected.map_or_else(|| "the start of the log".to_string(), |p| p.to_string())
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
