//! Integration tests: events appended to the log → ProjectionProcessor → a
//! read model, in catch-up and live mode.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::Tag;
use event_store::{AppendOptions, Event, EventLog, InMemoryEventLog, NewEvent};
use projections::{Projection, ProjectionPosition, ProjectionProcessor, Result};
use tokio::sync::{RwLock, watch};

/// Counts events per tag key.
#[derive(Clone, Default)]
struct TagCounts {
    counts: Arc<RwLock<BTreeMap<String, u64>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl TagCounts {
    async fn get(&self, key: &str) -> u64 {
        self.counts.read().await.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Projection for TagCounts {
    fn name(&self) -> &'static str {
        "TagCounts"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let mut counts = self.counts.write().await;
        for tag in &event.tags {
            *counts.entry(tag.key().to_string()).or_default() += 1;
        }
        let mut position = self.position.write().await;
        *position = position.advance(event.position);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.counts.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

fn tagged(key: &str, value: &str) -> NewEvent {
    NewEvent::new("Something", serde_json::json!({})).tagged(Tag::new(key, value))
}

async fn wait_for(view: &TagCounts, key: &str, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while view.get(key).await != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("projection did not catch up in time");
}

#[tokio::test]
async fn live_mode_delivers_history_then_new_appends() {
    let log = InMemoryEventLog::new();
    log.append(vec![tagged("Bike", "1"), tagged("Rental", "r")], AppendOptions::new())
        .await
        .unwrap();

    let view = TagCounts::default();
    let mut processor = ProjectionProcessor::new(log.clone());
    processor.register(Box::new(view.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let live = tokio::spawn(async move { processor.run_live(shutdown_rx).await });

    wait_for(&view, "Bike", 1).await;

    log.append(vec![tagged("Bike", "2")], AppendOptions::new())
        .await
        .unwrap();
    wait_for(&view, "Bike", 2).await;
    assert_eq!(view.get("Rental").await, 1);

    shutdown_tx.send(true).unwrap();
    live.await.unwrap().unwrap();
}

#[tokio::test]
async fn restarted_processor_resumes_after_its_position() {
    let log = InMemoryEventLog::new();
    let view = TagCounts::default();

    for round in 0..2 {
        log.append(vec![tagged("Bike", &round.to_string())], AppendOptions::new())
            .await
            .unwrap();

        let mut processor = ProjectionProcessor::new(log.clone());
        processor.register(Box::new(view.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let live = tokio::spawn(async move { processor.run_live(shutdown_rx).await });

        wait_for(&view, "Bike", round + 1).await;

        shutdown_tx.send(true).unwrap();
        live.await.unwrap().unwrap();
    }

    // Each event was counted once across both runs.
    assert_eq!(view.get("Bike").await, 2);
    assert_eq!(view.position().await.events_processed, 2);
}

#[tokio::test]
async fn rebuild_replays_into_a_reset_view() {
    let log = InMemoryEventLog::new();
    log.append(
        vec![tagged("Bike", "1"), tagged("Bike", "2"), tagged("Rental", "r")],
        AppendOptions::new(),
    )
    .await
    .unwrap();

    let view = TagCounts::default();
    let mut processor = ProjectionProcessor::new(log.clone());
    processor.register(Box::new(view.clone()));

    processor.run_catch_up().await.unwrap();
    view.counts.write().await.insert("Bike".into(), 99);

    processor.rebuild_all().await.unwrap();
    assert_eq!(view.get("Bike").await, 2);
    assert_eq!(view.get("Rental").await, 1);
    assert_eq!(log.head().await.unwrap(), view.position().await.last);
}

#[tokio::test]
async fn already_stopped_processor_returns_immediately() {
    let mut processor = ProjectionProcessor::new(InMemoryEventLog::new());
    processor.register(Box::new(TagCounts::default()));

    let (_shutdown_tx, shutdown_rx) = watch::channel(true);
    tokio::time::timeout(Duration::from_secs(1), processor.run_live(shutdown_rx))
        .await
        .unwrap()
        .unwrap();
}
