//! Durable deadline records and the hand-off to a timer.
//!
//! Deadlines live in the event log as three record types tagged
//! `Deadline:<schedule id>`. A record written by a handler is appended in the
//! same batch as the handler's events, so a deadline exists exactly when the
//! decision that requested it was applied.

use chrono::{DateTime, Utc};
use common::{ScheduleId, Tag};
use event_store::EventCriteria;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::command::Command;

/// Tag key shared by every deadline record.
pub const DEADLINE_TAG: &str = "Deadline";

/// Tag identifying the records of one deadline.
pub fn deadline_tag(schedule_id: ScheduleId) -> Tag {
    Tag::new(DEADLINE_TAG, schedule_id.to_string())
}

/// Criteria selecting every deadline record in the log.
pub fn deadline_records() -> EventCriteria {
    EventCriteria::of_types([
        DeadlineScheduled::EVENT_TYPE,
        DeadlineCancelled::EVENT_TYPE,
        DeadlineCompleted::EVENT_TYPE,
    ])
}

/// A command to deliver at or after `fire_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deadline {
    pub schedule_id: ScheduleId,
    pub command: Command,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineScheduled {
    pub schedule_id: ScheduleId,
    pub command: Command,
    pub fire_at: DateTime<Utc>,
}

impl DomainEvent for DeadlineScheduled {
    const EVENT_TYPE: &'static str = "DeadlineScheduled";

    fn tags(&self) -> Vec<Tag> {
        vec![deadline_tag(self.schedule_id)]
    }
}

impl From<DeadlineScheduled> for Deadline {
    fn from(record: DeadlineScheduled) -> Self {
        Self {
            schedule_id: record.schedule_id,
            command: record.command,
            fire_at: record.fire_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineCancelled {
    pub schedule_id: ScheduleId,
}

impl DomainEvent for DeadlineCancelled {
    const EVENT_TYPE: &'static str = "DeadlineCancelled";

    fn tags(&self) -> Vec<Tag> {
        vec![deadline_tag(self.schedule_id)]
    }
}

/// How a fired deadline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineOutcome {
    /// The command was handled (including handlers that chose to do nothing).
    Delivered,
    /// The handler rejected the command.
    Rejected,
    /// Delivery kept failing and the deadline was given up.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineCompleted {
    pub schedule_id: ScheduleId,
    pub outcome: DeadlineOutcome,
}

impl DomainEvent for DeadlineCompleted {
    const EVENT_TYPE: &'static str = "DeadlineCompleted";

    fn tags(&self) -> Vec<Tag> {
        vec![deadline_tag(self.schedule_id)]
    }
}

/// Receives deadlines once their records are durable.
///
/// Implemented by the timer that will fire them. Both calls are fire and
/// forget; the log records stay authoritative if the timer is gone.
pub trait DeadlineSink: Send + Sync {
    fn arm(&self, deadline: Deadline);

    fn disarm(&self, schedule_id: ScheduleId);
}
