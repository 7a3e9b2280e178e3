use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `(key, value)` pair naming the entity an event pertains to.
///
/// Tags are how events are selected for an aggregate: `("Bike", "bike-7")`
/// marks every event that belongs to bike 7. An event may carry several tags
/// when it concerns more than one entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the tag key (the entity kind, e.g. `"Bike"`).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the tag value (the entity identifier).
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Unique identifier for a scheduled deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    /// Creates a new random schedule ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a schedule ID from an existing UUID.
    ///
    /// Handlers use this to derive the deadline ID from an identifier they
    /// already track, so a later command can cancel it.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ScheduleId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ScheduleId> for Uuid {
    fn from(id: ScheduleId) -> Self {
        id.0
    }
}
