//! Durable deadline scheduling for the aggregate runtime.
//!
//! A handler asks for a command to be delivered later by returning a deadline
//! in its decision. The runtime appends a `DeadlineScheduled` record with the
//! handler's events and hands the deadline to [`DeadlineScheduler`] through
//! its [`SchedulerHandle`]. When the deadline is due the scheduler submits
//! the command, retrying transient failures with exponential backoff, and
//! appends a `DeadlineCompleted` record.
//!
//! On startup [`DeadlineScheduler::recover`] folds the records and re-arms
//! whatever was still pending.

pub mod config;
mod delivery;
pub mod error;
mod queue;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{DeadlineError, Result};
pub use scheduler::{DeadlineScheduler, SchedulerHandle};
