//! Process host for the aggregate runtime.
//!
//! Loads [`Config`] from the environment, installs logging and the
//! Prometheus exporter, and runs an [`Engine`] over the configured event log.

pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;

pub use config::{Config, LogFormat};
pub use engine::Engine;
pub use error::{NodeError, Result};
