//! The timer task and its handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use common::ScheduleId;
use event_store::{AppendOptions, EventLog, EventLogExt};
use runtime::deadline::deadline_records;
use runtime::{
    Command, CommandDispatcher, Deadline, DeadlineCancelled, DeadlineCompleted, DeadlineOutcome,
    DeadlineScheduled, DeadlineSink, DomainEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::delivery;
use crate::error::{DeadlineError, Result};
use crate::queue::TimerQueue;

enum Message {
    Arm(Deadline),
    Disarm(ScheduleId),
    PendingCount(oneshot::Sender<usize>),
    Shutdown,
}

/// Cheap handle that feeds the timer task.
///
/// This is what the runtime gets as its [`DeadlineSink`]: deadlines are
/// armed only after their records have been appended.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl SchedulerHandle {
    fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl DeadlineSink for SchedulerHandle {
    fn arm(&self, deadline: Deadline) {
        metrics::counter!("deadlines_scheduled_total").increment(1);
        let schedule_id = deadline.schedule_id;
        if !self.send(Message::Arm(deadline)) {
            tracing::debug!(%schedule_id, "scheduler stopped, deadline left for recovery");
        }
    }

    fn disarm(&self, schedule_id: ScheduleId) {
        if !self.send(Message::Disarm(schedule_id)) {
            tracing::debug!(%schedule_id, "scheduler stopped, ignoring cancellation");
        }
    }
}

/// Fires commands at their due time.
///
/// Deadlines are durable: every schedule, cancellation and completion is a
/// record in the event log, so [`recover`](Self::recover) can re-arm whatever
/// was pending when a previous process stopped. Delivery is at-least-once;
/// the handler of a fired command decides whether it still applies.
pub struct DeadlineScheduler<L> {
    log: L,
    handle: SchedulerHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<L> DeadlineScheduler<L>
where
    L: EventLog + Clone + 'static,
{
    /// Spawns the timer task. Must be called from within a Tokio runtime.
    pub fn start(
        dispatcher: Arc<dyn CommandDispatcher>,
        log: L,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = Timer {
            queue: TimerQueue::default(),
            deliveries: JoinSet::new(),
            dispatcher,
            log: log.clone(),
            config,
        };
        let task = tokio::spawn(timer.run(rx));

        Self {
            log,
            handle: SchedulerHandle { tx },
            task: Mutex::new(Some(task)),
        }
    }

    /// A sink for the runtime to arm and disarm deadlines through.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Schedules `command` to be submitted after `after` and returns its id.
    ///
    /// The record is appended before the deadline is armed.
    #[tracing::instrument(skip(self, command), fields(command_type = %command.command_type))]
    pub async fn schedule(&self, command: Command, after: Duration) -> Result<ScheduleId> {
        self.ensure_running()?;
        let fire_at = chrono::Duration::from_std(after)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        let deadline = Deadline {
            schedule_id: ScheduleId::new(),
            command,
            fire_at,
        };

        let record = DeadlineScheduled {
            schedule_id: deadline.schedule_id,
            command: deadline.command.clone(),
            fire_at,
        }
        .to_new_event()?;
        self.log.append_event(record, AppendOptions::new()).await?;

        let schedule_id = deadline.schedule_id;
        self.handle.arm(deadline);
        tracing::debug!(%schedule_id, %fire_at, "deadline scheduled");
        Ok(schedule_id)
    }

    /// Cancels a pending deadline. Cancelling one that already fired, or
    /// never existed, has no effect.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, schedule_id: ScheduleId) -> Result<()> {
        let record = DeadlineCancelled { schedule_id }.to_new_event()?;
        self.log.append_event(record, AppendOptions::new()).await?;
        self.handle.disarm(schedule_id);
        Ok(())
    }

    /// Re-arms every deadline whose records show it is still pending.
    ///
    /// Past-due deadlines fire immediately. Returns how many were armed.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let records = self.log.read_to_vec(&deadline_records(), None).await?;

        let mut pending: HashMap<ScheduleId, Deadline> = HashMap::new();
        for record in &records {
            match record.event_type.as_str() {
                DeadlineScheduled::EVENT_TYPE => {
                    let scheduled: DeadlineScheduled = record.decode()?;
                    pending.insert(scheduled.schedule_id, scheduled.into());
                }
                DeadlineCancelled::EVENT_TYPE => {
                    let cancelled: DeadlineCancelled = record.decode()?;
                    pending.remove(&cancelled.schedule_id);
                }
                DeadlineCompleted::EVENT_TYPE => {
                    let completed: DeadlineCompleted = record.decode()?;
                    pending.remove(&completed.schedule_id);
                }
                _ => {}
            }
        }

        self.ensure_running()?;
        let count = pending.len();
        for deadline in pending.into_values() {
            if !self.handle.send(Message::Arm(deadline)) {
                return Err(DeadlineError::SchedulerStopped);
            }
        }
        tracing::info!(records = records.len(), pending = count, "deadlines recovered");
        Ok(count)
    }

    /// Number of armed deadlines that have not fired yet.
    pub async fn pending_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        if !self.handle.send(Message::PendingCount(tx)) {
            return Err(DeadlineError::SchedulerStopped);
        }
        rx.await.map_err(|_| DeadlineError::SchedulerStopped)
    }

    /// Stops the timer task.
    ///
    /// Deliveries still in flight are aborted; their deadlines have no
    /// completion record and are delivered again after recovery.
    pub async fn shutdown(&self) {
        self.handle.send(Message::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "deadline timer task ended abnormally");
            }
        }
        tracing::info!("deadline scheduler stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.handle.tx.is_closed() {
            return Err(DeadlineError::SchedulerStopped);
        }
        Ok(())
    }
}

struct Timer<L> {
    queue: TimerQueue,
    deliveries: JoinSet<DeadlineOutcome>,
    dispatcher: Arc<dyn CommandDispatcher>,
    log: L,
    config: SchedulerConfig,
}

impl<L> Timer<L>
where
    L: EventLog + Clone + 'static,
{
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        tracing::debug!("deadline timer started");
        loop {
            let next_due = self.queue.next_due();
            tokio::select! {
                message = rx.recv() => match message {
                    Some(Message::Arm(deadline)) => self.queue.arm(deadline),
                    Some(Message::Disarm(schedule_id)) => {
                        if self.queue.disarm(schedule_id) {
                            tracing::debug!(%schedule_id, "deadline disarmed");
                        }
                    }
                    Some(Message::PendingCount(reply)) => {
                        let _ = reply.send(self.queue.len());
                    }
                    Some(Message::Shutdown) | None => break,
                },
                _ = sleep_until(next_due), if next_due.is_some() => {
                    for deadline in self.queue.pop_due(Instant::now()) {
                        self.deliveries.spawn(delivery::fire(
                            deadline,
                            Arc::clone(&self.dispatcher),
                            self.log.clone(),
                            self.config.clone(),
                        ));
                    }
                }
                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    match joined {
                        Ok(outcome) => tracing::trace!(?outcome, "deadline delivery finished"),
                        Err(e) => tracing::warn!(error = %e, "deadline delivery task failed"),
                    }
                }
            }
        }

        self.deliveries.shutdown().await;
        tracing::debug!(pending = self.queue.len(), "deadline timer stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
