use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Tag;
use futures_util::StreamExt;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Event, EventCriteria, EventId, EventStoreError, NewEvent, Position, Result, Snapshot,
    store::{AppendOptions, EventLog, EventStream, validate_events_for_append},
};

/// Key of the transaction-scoped advisory lock serializing appends.
///
/// Holding it until commit makes positions become visible in order, so
/// readers polling by position never skip an event.
const APPEND_LOCK_KEY: i64 = 0x6576_656e_745f_6c6f;

const EVENT_COLUMNS: &str = "position, event_id, event_type, tags, occurred_at, payload, metadata";

/// Page size used by subscriptions while catching up.
const SUBSCRIPTION_BATCH: i64 = 500;

/// Default delay between subscription polls once caught up.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// PostgreSQL-backed event log.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often an idle subscription checks for new events.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn after_value(after: Option<Position>) -> i64 {
    after.map_or(0, |p| p.as_i64())
}

fn position_from_db(value: i64) -> Position {
    Position::new(u64::try_from(value).unwrap_or_default())
}

/// Appends `(criterion) OR (criterion) ...` to the builder.
///
/// Tags are matched with JSONB containment so the GIN index on `tags` applies.
fn push_criteria(builder: &mut QueryBuilder<'_, Postgres>, criteria: &EventCriteria) -> Result<()> {
    if criteria.is_none() {
        builder.push("FALSE");
        return Ok(());
    }

    builder.push("(");
    for (i, criterion) in criteria.alternatives().iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push("(tags @> ");
        builder.push_bind(serde_json::to_value(criterion.required_tags())?);
        if !criterion.allowed_types().is_empty() {
            builder.push(" AND event_type = ANY(");
            builder.push_bind(criterion.allowed_types().iter().cloned().collect::<Vec<_>>());
            builder.push(")");
        }
        builder.push(")");
    }
    builder.push(")");
    Ok(())
}

fn row_to_event(row: PgRow) -> Result<Event> {
    let tags: BTreeSet<Tag> = serde_json::from_value(row.try_get("tags")?)?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_value(row.try_get("metadata")?)?;

    Ok(Event {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        event_type: row.try_get("event_type")?,
        tags,
        position: position_from_db(row.try_get("position")?),
        occurred_at: row.try_get::<DateTime<Utc>, _>("occurred_at")?,
        payload: row.try_get("payload")?,
        metadata,
    })
}

fn select_after(
    criteria: Option<&EventCriteria>,
    after: Option<Position>,
    limit: Option<i64>,
) -> Result<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events WHERE position > "));
    builder.push_bind(after_value(after));
    if let Some(criteria) = criteria {
        builder.push(" AND ");
        push_criteria(&mut builder, criteria)?;
    }
    builder.push(" ORDER BY position ASC");
    if let Some(limit) = limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }
    Ok(builder)
}

/// Streams matching rows as the database returns them.
///
/// The stream ends after the first error.
fn stream_after(pool: PgPool, criteria: Option<EventCriteria>, after: Option<Position>) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut builder = match select_after(criteria.as_ref(), after, None) {
            Ok(builder) => builder,
            Err(error) => {
                yield Err(error);
                return;
            }
        };
        let mut rows = builder.build().fetch(&pool);
        while let Some(row) = rows.next().await {
            let event = row.map_err(EventStoreError::from).and_then(row_to_event);
            let failed = event.is_err();
            yield event;
            if failed {
                break;
            }
        }
    })
}

/// Loads one bounded page, used by subscriptions.
async fn load_page(pool: &PgPool, after: Option<Position>, limit: i64) -> Result<Vec<Event>> {
    let mut builder = select_after(None, after, Some(limit))?;
    let rows = builder.build().fetch_all(pool).await?;
    rows.into_iter().map(row_to_event).collect()
}

#[async_trait]
impl EventLog for PostgresEventLog {
    #[tracing::instrument(skip_all, fields(count = events.len()))]
    async fn append(&self, events: Vec<NewEvent>, options: AppendOptions) -> Result<Vec<Position>> {
        validate_events_for_append(&events)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        if let Some(condition) = &options.condition {
            let mut builder =
                QueryBuilder::new("SELECT MIN(position) FROM events WHERE position > ");
            builder.push_bind(after_value(condition.after));
            builder.push(" AND ");
            push_criteria(&mut builder, &condition.criteria)?;

            let conflict: Option<i64> = builder
                .build_query_scalar()
                .fetch_one(&mut *tx)
                .await?;

            if let Some(actual) = conflict {
                return Err(EventStoreError::ConcurrencyConflict {
                    expected: condition.after,
                    actual: position_from_db(actual),
                });
            }
        }

        let head: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM events")
            .fetch_one(&mut *tx)
            .await?;

        let mut next = position_from_db(head).next();
        let mut positions = Vec::with_capacity(events.len());
        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO events (position, event_id, event_type, tags, occurred_at, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(next.as_i64())
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(serde_json::to_value(&event.tags)?)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .bind(serde_json::to_value(&event.metadata)?)
            .execute(&mut *tx)
            .await?;

            positions.push(next);
            next = next.next();
        }

        tx.commit().await?;
        metrics::counter!("events_appended_total").increment(positions.len() as u64);
        Ok(positions)
    }

    async fn read_after(
        &self,
        criteria: &EventCriteria,
        after: Option<Position>,
    ) -> Result<EventStream> {
        Ok(stream_after(self.pool.clone(), Some(criteria.clone()), after))
    }

    async fn read_all_after(&self, after: Option<Position>) -> Result<EventStream> {
        Ok(stream_after(self.pool.clone(), None, after))
    }

    async fn head(&self) -> Result<Option<Position>> {
        let head: Option<i64> = sqlx::query_scalar("SELECT MAX(position) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(head.map(position_from_db))
    }

    async fn subscribe(&self, from: Position) -> Result<EventStream> {
        let pool = self.pool.clone();
        let poll_interval = self.poll_interval;

        Ok(Box::pin(async_stream::stream! {
            let mut last = from.as_u64().checked_sub(1).filter(|p| *p > 0).map(Position::new);
            loop {
                match load_page(&pool, last, SUBSCRIPTION_BATCH).await {
                    Ok(events) => {
                        let caught_up = (events.len() as i64) < SUBSCRIPTION_BATCH;
                        for event in events {
                            last = Some(event.position);
                            yield Ok(event);
                        }
                        if caught_up {
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "subscription poll failed");
                        yield Err(error);
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (snapshot_key, aggregate_type, position, taken_at, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (snapshot_key) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                position = EXCLUDED.position,
                taken_at = EXCLUDED.taken_at,
                state = EXCLUDED.state
            "#,
        )
        .bind(&snapshot.key)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.position.as_i64())
        .bind(snapshot.taken_at)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, key: &str) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT snapshot_key, aggregate_type, position, taken_at, state
            FROM snapshots
            WHERE snapshot_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                key: row.try_get("snapshot_key")?,
                aggregate_type: row.try_get("aggregate_type")?,
                position: position_from_db(row.try_get("position")?),
                taken_at: row.try_get::<DateTime<Utc>, _>("taken_at")?,
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }
}
