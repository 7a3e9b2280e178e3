//! Scheduler error types.

use common::ScheduleId;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while scheduling or delivering deadlines.
#[derive(Debug, Error)]
pub enum DeadlineError {
    /// Delivery kept failing and the deadline was given up.
    #[error("Deadline {schedule_id} dropped after {attempts} attempt(s): {reason}")]
    SchedulingFailure {
        schedule_id: ScheduleId,
        attempts: u32,
        reason: String,
    },

    /// Event store error while reading or writing deadline records.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The timer task is no longer running.
    #[error("Deadline scheduler has stopped")]
    SchedulerStopped,
}

/// Convenience type alias for scheduler results.
pub type Result<T> = std::result::Result<T, DeadlineError>;
