use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{RwLock, broadcast};

use crate::{
    Event, EventCriteria, EventStoreError, NewEvent, Position, Result, Snapshot,
    store::{AppendOptions, EventLog, EventStream, validate_events_for_append},
};

const WAKEUP_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    /// Stored in position order; `events[i].position == i + 1`.
    events: Vec<Event>,
    snapshots: HashMap<String, Snapshot>,
}

impl Inner {
    fn head(&self) -> Option<Position> {
        self.events.last().map(|e| e.position)
    }

    fn after(&self, after: Option<Position>) -> &[Event] {
        let start = match after {
            Some(after) => self.events.partition_point(|e| e.position <= after),
            None => 0,
        };
        &self.events[start..]
    }
}

/// In-memory event log for tests and single-process deployments.
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// conditional appends and live subscriptions.
#[derive(Clone)]
pub struct InMemoryEventLog {
    inner: Arc<RwLock<Inner>>,
    appended: broadcast::Sender<Position>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        let (appended, _) = broadcast::channel(WAKEUP_CAPACITY);
        Self {
            inner: Arc::default(),
            appended,
            unavailable: Arc::default(),
        }
    }
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Simulates a storage outage. While set, appends and reads fail with
    /// [`EventStoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory log marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, events: Vec<NewEvent>, options: AppendOptions) -> Result<Vec<Position>> {
        validate_events_for_append(&events)?;
        self.ensure_available()?;

        let mut inner = self.inner.write().await;

        if let Some(condition) = &options.condition
            && let Some(conflict) = inner
                .after(condition.after)
                .iter()
                .find(|e| condition.criteria.matches(e))
        {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: condition.after,
                actual: conflict.position,
            });
        }

        let mut next = inner.head().map_or_else(Position::first, |p| p.next());
        let mut positions = Vec::with_capacity(events.len());
        for event in events {
            positions.push(next);
            inner.events.push(event.at(next));
            next = next.next();
        }
        drop(inner);

        metrics::counter!("events_appended_total").increment(positions.len() as u64);

        if let Some(last) = positions.last() {
            // No receivers just means nobody is subscribed.
            let _ = self.appended.send(*last);
        }

        Ok(positions)
    }

    async fn read_after(
        &self,
        criteria: &EventCriteria,
        after: Option<Position>,
    ) -> Result<EventStream> {
        self.ensure_available()?;

        let inner = self.inner.read().await;
        let events: Vec<Event> = inner
            .after(after)
            .iter()
            .filter(|e| criteria.matches(e))
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn read_all_after(&self, after: Option<Position>) -> Result<EventStream> {
        self.ensure_available()?;

        let inner = self.inner.read().await;
        let events = inner.after(after).to_vec();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn head(&self) -> Result<Option<Position>> {
        self.ensure_available()?;
        Ok(self.inner.read().await.head())
    }

    async fn subscribe(&self, from: Position) -> Result<EventStream> {
        self.ensure_available()?;

        // Register for wake-ups before reading history so no append is missed.
        let mut wakeups = self.appended.subscribe();
        let inner = Arc::clone(&self.inner);

        let stream = async_stream::stream! {
            let mut next = from;
            loop {
                let batch: Vec<Event> = {
                    let inner = inner.read().await;
                    let start = inner.events.partition_point(|e| e.position < next);
                    inner.events[start..].to_vec()
                };
                for event in batch {
                    next = event.position.next();
                    yield Ok(event);
                }

                match wakeups.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    // Every handle to the log is gone.
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        inner.snapshots.insert(snapshot.key.clone(), snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, key: &str) -> Result<Option<Snapshot>> {
        self.ensure_available()?;
        Ok(self.inner.read().await.snapshots.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;

    use super::*;
    use crate::{EventLogExt, Tag};

    fn bike_event(event_type: &str, bike: &str) -> NewEvent {
        NewEvent::new(event_type, serde_json::json!({"bike_id": bike})).tagged(Tag::new("Bike", bike))
    }

    fn bike_criteria(bike: &str) -> EventCriteria {
        EventCriteria::having_tag(Tag::new("Bike", bike))
    }

    #[tokio::test]
    async fn append_assigns_contiguous_positions() {
        let log = InMemoryEventLog::new();

        let first = log
            .append(vec![bike_event("BikeCreated", "1")], AppendOptions::new())
            .await
            .unwrap();
        let batch = log
            .append(
                vec![
                    bike_event("BikeCreated", "2"),
                    bike_event("BikeCreated", "3"),
                    bike_event("BikeCreated", "4"),
                ],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(first, vec![Position::new(1)]);
        assert_eq!(
            batch,
            vec![Position::new(2), Position::new(3), Position::new(4)]
        );
        assert_eq!(log.head().await.unwrap(), Some(Position::new(4)));
    }

    #[tokio::test]
    async fn read_filters_by_criteria_in_position_order() {
        let log = InMemoryEventLog::new();
        log.append(
            vec![
                bike_event("BikeCreated", "1"),
                bike_event("BikeCreated", "2"),
                bike_event("BikeRemovedFromFleet", "1"),
            ],
            AppendOptions::new(),
        )
        .await
        .unwrap();

        let events = log.read_to_vec(&bike_criteria("1"), None).await.unwrap();
        let positions: Vec<_> = events.iter().map(|e| e.position.as_u64()).collect();
        assert_eq!(positions, vec![1, 3]);

        let after = log
            .read_to_vec(&bike_criteria("1"), Some(Position::new(1)))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].event_type, "BikeRemovedFromFleet");
    }

    #[tokio::test]
    async fn conditional_append_conflicts_on_new_matching_event() {
        let log = InMemoryEventLog::new();
        log.append_event(bike_event("BikeCreated", "1"), AppendOptions::new())
            .await
            .unwrap();

        let marker = Some(Position::new(1));
        // A racing writer touches the same bike.
        log.append_event(bike_event("BikeRemovedFromFleet", "1"), AppendOptions::new())
            .await
            .unwrap();

        let result = log
            .append(
                vec![bike_event("BikeRentalRequested", "1")],
                AppendOptions::expect_unchanged(bike_criteria("1"), marker),
            )
            .await;

        match result {
            Err(EventStoreError::ConcurrencyConflict { expected, actual }) => {
                assert_eq!(expected, marker);
                assert_eq!(actual, Position::new(2));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(log.event_count().await, 2);
    }

    #[tokio::test]
    async fn conditional_append_ignores_unrelated_events() {
        let log = InMemoryEventLog::new();
        log.append_event(bike_event("BikeCreated", "1"), AppendOptions::new())
            .await
            .unwrap();
        log.append_event(bike_event("BikeCreated", "2"), AppendOptions::new())
            .await
            .unwrap();

        let positions = log
            .append(
                vec![bike_event("BikeRemovedFromFleet", "1")],
                AppendOptions::expect_unchanged(bike_criteria("1"), Some(Position::new(1))),
            )
            .await
            .unwrap();
        assert_eq!(positions, vec![Position::new(3)]);
    }

    #[tokio::test]
    async fn expect_none_rejects_second_creation() {
        let log = InMemoryEventLog::new();
        let created = bike_criteria("1").and_being_one_of_types(["BikeCreated"]);

        log.append_event(
            bike_event("BikeCreated", "1"),
            AppendOptions::expect_none(created.clone()),
        )
        .await
        .unwrap();
        let second = log
            .append_event(bike_event("BikeCreated", "1"), AppendOptions::expect_none(created))
            .await;

        assert!(second.unwrap_err().is_conflict());
        assert_eq!(log.event_count().await, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let log = InMemoryEventLog::new();
        let result = log.append(vec![], AppendOptions::new()).await;
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }

    #[tokio::test]
    async fn unavailable_log_appends_nothing() {
        let log = InMemoryEventLog::new();
        log.set_unavailable(true);

        let err = log
            .append(vec![bike_event("BikeCreated", "1")], AppendOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(log.read(&bike_criteria("1")).await.is_err());

        log.set_unavailable(false);
        assert_eq!(log.event_count().await, 0);
    }

    #[tokio::test]
    async fn read_all_after_returns_suffix() {
        let log = InMemoryEventLog::new();
        for bike in ["1", "2", "3"] {
            log.append_event(bike_event("BikeCreated", bike), AppendOptions::new())
                .await
                .unwrap();
        }

        let events: Vec<_> = log
            .read_all_after(Some(Position::new(1)))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(log.any_match(&bike_criteria("3")).await.unwrap());
        assert!(!log.any_match(&bike_criteria("4")).await.unwrap());
    }

    #[tokio::test]
    async fn subscribe_replays_history_then_follows_appends() {
        let log = InMemoryEventLog::new();
        log.append_event(bike_event("BikeCreated", "1"), AppendOptions::new())
            .await
            .unwrap();
        log.append_event(bike_event("BikeCreated", "2"), AppendOptions::new())
            .await
            .unwrap();

        let mut subscription = log.subscribe(Position::new(2)).await.unwrap();

        let replayed = subscription.next().await.unwrap().unwrap();
        assert_eq!(replayed.position, Position::new(2));

        let writer = log.clone();
        tokio::spawn(async move {
            writer
                .append_event(bike_event("BikeCreated", "3"), AppendOptions::new())
                .await
                .unwrap();
        });

        let live = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("subscription should deliver the live append")
            .unwrap()
            .unwrap();
        assert_eq!(live.position, Position::new(3));
    }

    #[tokio::test]
    async fn snapshot_save_and_retrieve() {
        let log = InMemoryEventLog::new();
        let snapshot = Snapshot::new(
            "BikeRental|Bike:1",
            "BikeRental",
            Position::new(5),
            serde_json::json!({"state": "saved"}),
        );

        log.save_snapshot(snapshot).await.unwrap();

        let retrieved = log.get_snapshot("BikeRental|Bike:1").await.unwrap().unwrap();
        assert_eq!(retrieved.position, Position::new(5));
        assert!(log.get_snapshot("BikeRental|Bike:2").await.unwrap().is_none());
    }
}
