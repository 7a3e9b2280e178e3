//! Firing one deadline: dispatch with retries, then record how it ended.

use std::sync::Arc;

use event_store::{AppendOptions, EventLog, EventLogExt};
use runtime::{CommandDispatcher, Deadline, DeadlineCompleted, DeadlineOutcome, DomainEvent};

use crate::config::SchedulerConfig;
use crate::error::DeadlineError;

/// Delivers the deadline's command and appends its completion record.
#[tracing::instrument(
    skip_all,
    fields(schedule_id = %deadline.schedule_id, command_type = %deadline.command.command_type)
)]
pub(crate) async fn fire<L: EventLog>(
    deadline: Deadline,
    dispatcher: Arc<dyn CommandDispatcher>,
    log: L,
    config: SchedulerConfig,
) -> DeadlineOutcome {
    metrics::counter!("deadlines_fired_total").increment(1);

    let outcome = deliver(&deadline, dispatcher.as_ref(), &config).await;
    if let Err(e) = record_completion(&log, &deadline, outcome).await {
        // Without the record, recovery will deliver this deadline again.
        tracing::warn!(error = %e, "failed to record deadline completion");
    }
    outcome
}

async fn deliver(
    deadline: &Deadline,
    dispatcher: &dyn CommandDispatcher,
    config: &SchedulerConfig,
) -> DeadlineOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match dispatcher.dispatch(deadline.command.clone()).await {
            Ok(_) => {
                tracing::debug!(attempt, "deadline delivered");
                return DeadlineOutcome::Delivered;
            }
            Err(e) if e.is_validation() => {
                tracing::info!(error = %e, "deadline command rejected");
                return DeadlineOutcome::Rejected;
            }
            Err(e) if e.is_transient() && attempt < config.max_delivery_attempts => {
                let delay = config.backoff(attempt);
                tracing::debug!(attempt, ?delay, error = %e, "deadline delivery failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                let failure = DeadlineError::SchedulingFailure {
                    schedule_id: deadline.schedule_id,
                    attempts: attempt,
                    reason: e.to_string(),
                };
                metrics::counter!("deadlines_dropped_total").increment(1);
                tracing::error!(error = %failure, "dropping deadline");
                return DeadlineOutcome::Dropped;
            }
        }
    }
}

async fn record_completion<L: EventLog>(
    log: &L,
    deadline: &Deadline,
    outcome: DeadlineOutcome,
) -> Result<(), DeadlineError> {
    let record = DeadlineCompleted {
        schedule_id: deadline.schedule_id,
        outcome,
    }
    .to_new_event()?;
    log.append_event(record, AppendOptions::new()).await?;
    Ok(())
}
