use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::{Event, EventCriteria, EventStoreError, NewEvent, Position, Result, Snapshot};

/// Condition checked atomically with an append.
///
/// The append is rejected if any stored event matching `criteria` has a
/// position greater than `after`. `after: None` means no matching event may
/// exist at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCondition {
    pub criteria: EventCriteria,
    pub after: Option<Position>,
}

/// Options for appending events to the log.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Optimistic concurrency check. If None, the append is unconditional.
    pub condition: Option<AppendCondition>,
}

impl AppendOptions {
    /// Creates options with no concurrency check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the append if events matching `criteria` were stored after `after`.
    pub fn expect_unchanged(criteria: EventCriteria, after: Option<Position>) -> Self {
        Self {
            condition: Some(AppendCondition { criteria, after }),
        }
    }

    /// Fails the append if any event matching `criteria` exists.
    pub fn expect_none(criteria: EventCriteria) -> Self {
        Self::expect_unchanged(criteria, None)
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Core trait for event log implementations.
///
/// The log is the only shared mutable resource of the system. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends a batch of events.
    ///
    /// The batch is atomic: either every event is stored, at contiguous
    /// increasing positions, or none is. If `options.condition` is set the
    /// check and the write happen under the same exclusion.
    ///
    /// Returns the positions assigned to the events, in batch order.
    async fn append(&self, events: Vec<NewEvent>, options: AppendOptions) -> Result<Vec<Position>>;

    /// Streams the events matching `criteria` with a position greater than
    /// `after`, in ascending position order.
    ///
    /// The stream is finite; it ends at the head of the log as of the call.
    async fn read_after(
        &self,
        criteria: &EventCriteria,
        after: Option<Position>,
    ) -> Result<EventStream>;

    /// Streams every event with a position greater than `after`.
    async fn read_all_after(&self, after: Option<Position>) -> Result<EventStream>;

    /// Position of the latest stored event, or None for an empty log.
    async fn head(&self) -> Result<Option<Position>>;

    /// Streams every event with position ≥ `from`, history first and then new
    /// appends as they happen.
    ///
    /// Delivery is at-least-once and the stream never ends on its own;
    /// consumers track positions and apply idempotently.
    async fn subscribe(&self, from: Position) -> Result<EventStream>;

    /// Saves a snapshot, replacing any previous one with the same key.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the snapshot stored under `key`.
    async fn get_snapshot(&self, key: &str) -> Result<Option<Snapshot>>;
}

/// Extension trait providing convenience methods for event logs.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Streams every event matching `criteria`.
    async fn read(&self, criteria: &EventCriteria) -> Result<EventStream> {
        self.read_after(criteria, None).await
    }

    /// Collects the events matching `criteria` after `after`.
    async fn read_to_vec(
        &self,
        criteria: &EventCriteria,
        after: Option<Position>,
    ) -> Result<Vec<Event>> {
        self.read_after(criteria, after).await?.try_collect().await
    }

    /// Appends a single event.
    async fn append_event(&self, event: NewEvent, options: AppendOptions) -> Result<Position> {
        let positions = self.append(vec![event], options).await?;
        positions
            .first()
            .copied()
            .ok_or_else(|| EventStoreError::InvalidAppend("append returned no position".into()))
    }

    /// Checks whether any event matches `criteria`.
    async fn any_match(&self, criteria: &EventCriteria) -> Result<bool> {
        let mut stream = self.read(criteria).await?;
        Ok(stream.try_next().await?.is_some())
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> EventLogExt for T {}

/// Validates a batch before appending.
pub fn validate_events_for_append(events: &[NewEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    }

    if let Some(event) = events.iter().find(|e| e.event_type.trim().is_empty()) {
        return Err(EventStoreError::InvalidAppend(format!(
            "Event {} has an empty type name",
            event.event_id
        )));
    }

    Ok(())
}
