use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Position;

/// A cached aggregate state valid up to a log position.
///
/// Loading from a snapshot folds only the matching events stored after
/// `position`, so a snapshot is an optimization and never a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Identifies the state this snapshot belongs to (aggregate type plus
    /// the consistency boundary key).
    pub key: String,

    /// The type of aggregate (e.g., "BikeRental").
    pub aggregate_type: String,

    /// Last log position folded into `state`.
    pub position: Position,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(
        key: impl Into<String>,
        aggregate_type: impl Into<String>,
        position: Position,
        state: serde_json::Value,
    ) -> Self {
        Self {
            key: key.into(),
            aggregate_type: aggregate_type.into(),
            position,
            taken_at: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        key: impl Into<String>,
        aggregate_type: impl Into<String>,
        position: Position,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            key,
            aggregate_type,
            position,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}
