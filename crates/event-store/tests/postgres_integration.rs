//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container. Every test works on its own
//! freshly generated tags, so they can run in parallel against one database.
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use event_store::{
    AppendOptions, EventCriteria, EventLog, EventLogExt, EventStoreError, NewEvent,
    PostgresEventLog, Position, Snapshot, Tag,
};
use futures_util::StreamExt;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a log with its own pool
async fn get_test_log() -> PostgresEventLog {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    PostgresEventLog::new(pool).with_poll_interval(Duration::from_millis(20))
}

fn unique_tag(key: &str) -> Tag {
    Tag::new(key, Uuid::new_v4().to_string())
}

fn tagged_event(event_type: &str, tag: &Tag) -> NewEvent {
    NewEvent::new(event_type, serde_json::json!({"id": tag.value()})).tagged(tag.clone())
}

#[tokio::test]
async fn append_and_read_back_by_tag() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");

    let positions = log
        .append(vec![tagged_event("BikeCreated", &bike)], AppendOptions::new())
        .await
        .unwrap();
    assert_eq!(positions.len(), 1);

    let events = log
        .read_to_vec(&EventCriteria::having_tag(bike.clone()), None)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "BikeCreated");
    assert_eq!(events[0].position, positions[0]);
    assert!(events[0].has_tag(&bike));
}

#[tokio::test]
async fn batch_positions_are_contiguous() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");

    let positions = log
        .append(
            vec![
                tagged_event("BikeCreated", &bike),
                tagged_event("BikeRentalRequested", &bike),
                tagged_event("PaymentCompleted", &bike),
            ],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(positions[1], positions[0].next());
    assert_eq!(positions[2], positions[1].next());
    assert!(log.head().await.unwrap().unwrap() >= positions[2]);
}

#[tokio::test]
async fn reads_stream_rows_from_an_open_cursor() {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&info.connection_string)
        .await
        .unwrap();
    let log = PostgresEventLog::new(pool);
    let bike = unique_tag("Bike");

    log.append(
        (0..3).map(|_| tagged_event("BikeCreated", &bike)).collect(),
        AppendOptions::new(),
    )
    .await
    .unwrap();

    let mut stream = log
        .read_after(&EventCriteria::having_tag(bike.clone()), None)
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert!(first.has_tag(&bike));

    // The half-read stream still holds the only connection.
    let blocked = tokio::time::timeout(Duration::from_millis(300), log.head()).await;
    assert!(blocked.is_err());

    let rest: Vec<_> = stream.collect().await;
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|e| e.as_ref().unwrap().position > first.position));
    assert!(log.head().await.unwrap().is_some());
}

#[tokio::test]
async fn criteria_filter_on_types_and_multiple_tags() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");
    let rental = unique_tag("Rental");

    log.append(
        vec![
            tagged_event("BikeCreated", &bike),
            tagged_event("BikeRentalRequested", &bike).tagged(rental.clone()),
            tagged_event("PaymentCompleted", &bike).tagged(rental.clone()),
        ],
        AppendOptions::new(),
    )
    .await
    .unwrap();

    let both_tags = EventCriteria::having_tags([bike.clone(), rental.clone()]);
    assert_eq!(log.read_to_vec(&both_tags, None).await.unwrap().len(), 2);

    let typed = EventCriteria::either([
        EventCriteria::having_tag(bike.clone()).and_being_one_of_types(["BikeCreated"]),
        EventCriteria::having_tag(rental.clone()).and_being_one_of_types(["PaymentCompleted"]),
    ]);
    let types: Vec<_> = log
        .read_to_vec(&typed, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["BikeCreated", "PaymentCompleted"]);

    assert!(
        log.read_to_vec(&EventCriteria::none(), None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn conditional_append_detects_racing_writer() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");
    let criteria = EventCriteria::having_tag(bike.clone());

    let created = log
        .append_event(
            tagged_event("BikeCreated", &bike),
            AppendOptions::expect_none(criteria.clone()),
        )
        .await
        .unwrap();

    let racing = log
        .append_event(
            tagged_event("BikeRentalRequested", &bike),
            AppendOptions::expect_unchanged(criteria.clone(), Some(created)),
        )
        .await
        .unwrap();

    let stale = log
        .append_event(
            tagged_event("BikeRemovedFromFleet", &bike),
            AppendOptions::expect_unchanged(criteria.clone(), Some(created)),
        )
        .await;

    match stale {
        Err(EventStoreError::ConcurrencyConflict { expected, actual }) => {
            assert_eq!(expected, Some(created));
            assert_eq!(actual, racing);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(log.read_to_vec(&criteria, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_conditional_appends_admit_one_writer() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");
    let criteria = EventCriteria::having_tag(bike.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let log = log.clone();
        let bike = bike.clone();
        let criteria = criteria.clone();
        handles.push(tokio::spawn(async move {
            log.append_event(
                tagged_event("BikeCreated", &bike),
                AppendOptions::expect_none(criteria),
            )
            .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(e.is_conflict()),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(log.read_to_vec(&criteria, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn event_metadata_and_payload_preserved() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");

    let event = tagged_event("BikeCreated", &bike)
        .with_metadata("command_type", serde_json::json!("RegisterBike"))
        .with_metadata("attempt", serde_json::json!(2));
    let event_id = event.event_id;
    log.append_event(event, AppendOptions::new()).await.unwrap();

    let stored = log
        .read_to_vec(&EventCriteria::having_tag(bike.clone()), None)
        .await
        .unwrap();
    assert_eq!(stored[0].event_id, event_id);
    assert_eq!(stored[0].payload, serde_json::json!({"id": bike.value()}));
    assert_eq!(
        stored[0].metadata.get("command_type"),
        Some(&serde_json::json!("RegisterBike"))
    );
    assert_eq!(stored[0].metadata.get("attempt"), Some(&serde_json::json!(2)));
}

#[tokio::test]
async fn subscribe_delivers_history_then_live_events() {
    let log = get_test_log().await;
    let bike = unique_tag("Bike");

    let first = log
        .append_event(tagged_event("BikeCreated", &bike), AppendOptions::new())
        .await
        .unwrap();

    let mut subscription = log.subscribe(first).await.unwrap();
    let replayed = subscription.next().await.unwrap().unwrap();
    assert_eq!(replayed.position, first);

    let live = log
        .append_event(tagged_event("BikeRemovedFromFleet", &bike), AppendOptions::new())
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = subscription.next().await.unwrap().unwrap();
            if event.position == live {
                return event;
            }
        }
    })
    .await
    .expect("live event should be delivered");
    assert_eq!(delivered.event_type, "BikeRemovedFromFleet");
}

#[tokio::test]
async fn snapshot_upsert_replaces_existing() {
    let log = get_test_log().await;
    let key = format!("BikeRental|{}", unique_tag("Bike"));

    assert!(log.get_snapshot(&key).await.unwrap().is_none());

    log.save_snapshot(Snapshot::new(
        key.clone(),
        "BikeRental",
        Position::new(3),
        serde_json::json!({"status": "available"}),
    ))
    .await
    .unwrap();
    log.save_snapshot(Snapshot::new(
        key.clone(),
        "BikeRental",
        Position::new(9),
        serde_json::json!({"status": "reserved"}),
    ))
    .await
    .unwrap();

    let snapshot = log.get_snapshot(&key).await.unwrap().unwrap();
    assert_eq!(snapshot.position, Position::new(9));
    assert_eq!(snapshot.state, serde_json::json!({"status": "reserved"}));
}
