//! Event-sourced aggregate runtime.
//!
//! This crate turns per-domain registration tables into a command engine:
//! - [`Projector`] folds criteria-filtered events into a typed state
//! - [`AggregateDefinition`] ties a state, its initial value and its criteria together
//! - [`CommandRegistry`] maps command types to synchronous handlers
//! - [`AggregateRuntime`] loads, decides and appends with per-identifier serialization
//! - [`CommandGateway`] is the entry point for external callers

pub mod aggregate;
pub mod command;
pub mod config;
pub mod deadline;
pub mod decision;
pub mod definition;
pub mod error;
pub mod gateway;
mod locks;
pub mod projector;
pub mod registry;
pub mod runtime;

pub use aggregate::{CommandPayload, DomainEvent};
pub use command::{Command, CommandResult};
pub use config::RuntimeConfig;
pub use deadline::{
    Deadline, DeadlineCancelled, DeadlineCompleted, DeadlineOutcome, DeadlineScheduled,
    DeadlineSink,
};
pub use decision::{Decision, DeadlineRequest};
pub use definition::AggregateDefinition;
pub use error::{Result, RuntimeError, ValidationError};
pub use gateway::{CommandFuture, CommandGateway};
pub use projector::Projector;
pub use registry::CommandRegistry;
pub use runtime::{AggregateRuntime, CommandDispatcher};
