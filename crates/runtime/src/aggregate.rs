//! Traits implemented by domain events and typed commands.

use common::Tag;
use event_store::NewEvent;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Each event type is a separate serializable struct with a stable type name.
/// The tags say which entities the event pertains to; criteria select events
/// by these tags.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name written to the log.
    const EVENT_TYPE: &'static str;

    /// Entities this event pertains to.
    fn tags(&self) -> Vec<Tag>;

    /// Builds the log record for this event.
    fn to_new_event(&self) -> Result<NewEvent, serde_json::Error> {
        Ok(NewEvent::from_payload(Self::EVENT_TYPE, self)?.with_tags(self.tags()))
    }
}

/// Trait for typed commands.
///
/// A command names the identifier it targets; the aggregate definition turns
/// that identifier into event criteria.
pub trait CommandPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable command type name used for routing.
    const COMMAND_TYPE: &'static str;

    /// Identifier shape shared by every command of one aggregate type.
    type Target: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Returns the identifier this command targets.
    fn target(&self) -> Self::Target;
}
