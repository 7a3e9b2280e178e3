//! The aggregate runtime: load, decide, append.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::{AppendOptions, EventLog, EventLogExt, NewEvent, Position, Snapshot};
use serde_json::json;

use crate::aggregate::DomainEvent;
use crate::command::{Command, CommandResult};
use crate::config::RuntimeConfig;
use crate::deadline::{Deadline, DeadlineCancelled, DeadlineScheduled, DeadlineSink};
use crate::definition::AggregateDefinition;
use crate::error::{Result, RuntimeError};
use crate::locks::KeyedLocks;
use crate::registry::{CommandRegistry, CommandRoute, Outcome, RestoredState};

/// Metadata key recording which command produced an event.
pub const COMMAND_TYPE_METADATA: &str = "command_type";

/// Anything that accepts type-erased commands.
///
/// The deadline scheduler redelivers through this trait so it does not
/// depend on the log type of the runtime it feeds.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: Command) -> CommandResult;
}

#[async_trait]
impl<D: CommandDispatcher + ?Sized> CommandDispatcher for Arc<D> {
    async fn dispatch(&self, command: Command) -> CommandResult {
        (**self).dispatch(command).await
    }
}

/// Generic command engine over an event log.
///
/// For each command the runtime derives the event criteria from the target,
/// takes the per-identifier lock, folds the matching events into state, runs
/// the registered handler and appends its decision with an optimistic
/// concurrency condition. Conflicting appends are retried from a fresh load.
pub struct AggregateRuntime<L> {
    log: L,
    registry: CommandRegistry,
    locks: KeyedLocks,
    config: RuntimeConfig,
    deadlines: OnceLock<Arc<dyn DeadlineSink>>,
}

impl<L: EventLog> AggregateRuntime<L> {
    /// Creates a runtime with default configuration.
    pub fn new(log: L, registry: CommandRegistry) -> Self {
        Self::with_config(log, registry, RuntimeConfig::default())
    }

    pub fn with_config(log: L, registry: CommandRegistry, config: RuntimeConfig) -> Self {
        Self {
            log,
            registry,
            locks: KeyedLocks::default(),
            config,
            deadlines: OnceLock::new(),
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Connects the timer that arms deadlines once their records are appended.
    ///
    /// Returns false if a sink was already attached. Without a sink deadline
    /// records are still written and can be armed later by recovery.
    pub fn attach_deadlines(&self, sink: Arc<dyn DeadlineSink>) -> bool {
        self.deadlines.set(sink).is_ok()
    }

    /// Rebuilds the current state of one aggregate.
    pub async fn load<S, T>(&self, definition: &AggregateDefinition<S, T>, target: &T) -> Result<S>
    where
        S: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
        T: 'static,
    {
        let criteria = definition.criteria_for(target);
        let events = self.log.read_to_vec(&criteria, None).await?;
        definition.project(&events)
    }

    /// Handles one command and returns the handler's result.
    #[tracing::instrument(skip(self, command), fields(command_type = %command.command_type))]
    pub async fn handle(&self, command: Command) -> CommandResult {
        let start = Instant::now();

        let result = self.try_handle(&command).await;

        metrics::histogram!("command_duration_seconds").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => {
                metrics::counter!("commands_handled_total").increment(1);
                tracing::debug!("command applied");
            }
            Err(RuntimeError::Validation(rejection)) => {
                metrics::counter!("commands_rejected_total").increment(1);
                tracing::info!(code = %rejection.code, "command rejected");
            }
            Err(e) => tracing::warn!(error = %e, "command failed"),
        }
        result
    }

    async fn try_handle(&self, command: &Command) -> CommandResult {
        let route = self.registry.route(&command.command_type)?;
        let criteria = route.criteria(command)?;
        let lock_key = criteria.lock_key();
        let snapshot_key = criteria.scoped_key(route.aggregate_type());

        let _guard = self.locks.acquire(&lock_key).await;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let (state, from) = self.load_snapshot(route.as_ref(), &snapshot_key).await;
            let events = self.log.read_to_vec(&criteria, from).await?;
            let marker = events.last().map(|e| e.position).or(from);
            tracing::trace!(attempt, loaded = events.len(), ?marker, "state loaded");

            let Outcome {
                result,
                events: emitted,
                deadlines,
                cancellations,
                snapshot,
            } = route.decide(command, state, &events)?;

            if let (Some(state), Some(position)) = (snapshot, marker) {
                self.save_snapshot(Snapshot::new(
                    snapshot_key.clone(),
                    route.aggregate_type(),
                    position,
                    state,
                ))
                .await;
            }

            if emitted.is_empty() && deadlines.is_empty() && cancellations.is_empty() {
                return Ok(result);
            }

            let now = Utc::now();
            let armed: Vec<Deadline> = deadlines
                .into_iter()
                .map(|request| Deadline {
                    schedule_id: request.schedule_id,
                    command: request.command,
                    fire_at: fire_at(now, request.after),
                })
                .collect();
            let batch = build_batch(&command.command_type, emitted, &armed, &cancellations)?;
            let count = batch.len();

            match self
                .log
                .append(batch, AppendOptions::expect_unchanged(criteria.clone(), marker))
                .await
            {
                Ok(positions) => {
                    tracing::debug!(
                        appended = count,
                        last = ?positions.last().map(Position::as_u64),
                        "decision appended"
                    );
                    self.hand_off_deadlines(armed, &cancellations);
                    return Ok(result);
                }
                Err(e) if e.is_conflict() => {
                    metrics::counter!("command_conflicts_total").increment(1);
                    if attempt >= self.config.max_attempts {
                        return Err(RuntimeError::ConcurrencyConflict {
                            lock_key,
                            attempts: attempt,
                        });
                    }
                    tracing::debug!(attempt, error = %e, "racing writer, reloading state");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load_snapshot(
        &self,
        route: &dyn CommandRoute,
        key: &str,
    ) -> (Option<RestoredState>, Option<Position>) {
        if !route.snapshots_enabled() {
            return (None, None);
        }

        match self.log.get_snapshot(key).await {
            Ok(Some(snapshot)) => {
                let position = snapshot.position;
                match route.restore(snapshot) {
                    Ok(state) => (Some(state), Some(position)),
                    Err(e) => {
                        tracing::warn!(key, error = %e, "ignoring undecodable snapshot");
                        (None, None)
                    }
                }
            }
            Ok(None) => (None, None),
            Err(e) => {
                tracing::warn!(key, error = %e, "snapshot unavailable, loading all events");
                (None, None)
            }
        }
    }

    async fn save_snapshot(&self, snapshot: Snapshot) {
        let key = snapshot.key.clone();
        if let Err(e) = self.log.save_snapshot(snapshot).await {
            tracing::warn!(key = %key, error = %e, "failed to save snapshot");
        }
    }

    fn hand_off_deadlines(&self, armed: Vec<Deadline>, cancellations: &[common::ScheduleId]) {
        let Some(sink) = self.deadlines.get() else {
            if !armed.is_empty() || !cancellations.is_empty() {
                tracing::debug!("no deadline sink attached, records left for recovery");
            }
            return;
        };

        for schedule_id in cancellations {
            sink.disarm(*schedule_id);
        }
        for deadline in armed {
            sink.arm(deadline);
        }
    }
}

#[async_trait]
impl<L: EventLog + 'static> CommandDispatcher for AggregateRuntime<L> {
    async fn dispatch(&self, command: Command) -> CommandResult {
        self.handle(command).await
    }
}

fn fire_at(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handler events first, then deadline records, all stamped with the
/// command type.
fn build_batch(
    command_type: &str,
    events: Vec<NewEvent>,
    armed: &[Deadline],
    cancellations: &[common::ScheduleId],
) -> Result<Vec<NewEvent>> {
    let mut batch = events;
    for deadline in armed {
        batch.push(
            DeadlineScheduled {
                schedule_id: deadline.schedule_id,
                command: deadline.command.clone(),
                fire_at: deadline.fire_at,
            }
            .to_new_event()?,
        );
    }
    for schedule_id in cancellations {
        batch.push(
            DeadlineCancelled {
                schedule_id: *schedule_id,
            }
            .to_new_event()?,
        );
    }

    Ok(batch
        .into_iter()
        .map(|event| event.with_metadata(COMMAND_TYPE_METADATA, json!(command_type)))
        .collect())
}
