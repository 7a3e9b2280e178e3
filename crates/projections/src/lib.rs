//! Read models fed from the event log.
//!
//! This crate provides the query side of the runtime:
//! - [`Projection`] trait for processing events into read models
//! - [`ProjectionProcessor`] for feeding events from the log to projections,
//!   either as a catch-up replay or by following the log's subscription

pub mod error;
pub mod processor;
pub mod projection;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
