pub mod criteria;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::Tag;
pub use criteria::{EventCriteria, EventCriterion};
pub use error::{EventStoreError, Result};
pub use event::{Event, EventId, NewEvent, Position};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use snapshot::Snapshot;
pub use store::{
    AppendCondition, AppendOptions, EventLog, EventLogExt, EventStream, validate_events_for_append,
};
