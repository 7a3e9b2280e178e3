//! Runtime error types.

use event_store::{EventStoreError, Position};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A command rejected by its handler because it violates a business rule.
///
/// Rejections are ordinary results: nothing is appended when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ValidationError {
    /// Stable machine-readable reason (e.g., "bike_already_reserved").
    pub code: String,

    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur while handling a command.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The handler rejected the command.
    #[error("Command rejected: {0}")]
    Validation(#[from] ValidationError),

    /// Racing writers kept changing the events this command depends on.
    #[error("Concurrency conflict on '{lock_key}' after {attempts} attempts")]
    ConcurrencyConflict { lock_key: String, attempts: u32 },

    /// The event log could not read or durably write. Nothing was applied.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Any other event log failure.
    #[error("Event store error: {0}")]
    Store(EventStoreError),

    /// No handler is registered for the command type.
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    /// A handler for this command type is already registered.
    #[error("Command type already registered: {0}")]
    DuplicateCommand(String),

    /// The command payload or target does not match the registered shape.
    #[error("Invalid {command_type} command: {reason}")]
    InvalidCommand {
        command_type: String,
        reason: String,
    },

    /// A stored event could not be decoded into its registered type.
    #[error("Failed to decode {event_type} at position {position}: {source}")]
    Decode {
        event_type: String,
        position: Position,
        source: serde_json::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The command could not be delivered to the runtime.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl RuntimeError {
    /// Returns true if resubmitting the same command later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::ConcurrencyConflict { .. } | RuntimeError::StorageUnavailable(_)
        )
    }

    /// Returns true if the handler rejected the command.
    pub fn is_validation(&self) -> bool {
        matches!(self, RuntimeError::Validation(_))
    }

    /// Returns the rejection if the handler rejected the command.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            RuntimeError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EventStoreError> for RuntimeError {
    fn from(e: EventStoreError) -> Self {
        if e.is_unavailable() {
            RuntimeError::StorageUnavailable(e.to_string())
        } else {
            RuntimeError::Store(e)
        }
    }
}

/// Convenience type alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;
