//! What a command handler decided.

use std::time::Duration;

use common::ScheduleId;
use event_store::NewEvent;

use crate::aggregate::{CommandPayload, DomainEvent};
use crate::command::Command;

/// A request to redeliver a command after a delay.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineRequest {
    pub schedule_id: ScheduleId,
    pub command: Command,
    pub after: Duration,
}

/// The result of a successful handler invocation: a result payload for the
/// caller, the events to append, and deadlines to schedule or cancel.
///
/// Everything in a decision is appended in one atomic batch, so either all
/// of it takes effect or none of it does.
#[derive(Debug)]
pub struct Decision<R> {
    result: R,
    events: Vec<NewEvent>,
    deadlines: Vec<DeadlineRequest>,
    cancellations: Vec<ScheduleId>,
    encode_error: Option<serde_json::Error>,
}

impl Decision<()> {
    /// A decision that changes nothing.
    pub fn none() -> Self {
        Self::new(())
    }
}

impl<R> Decision<R> {
    /// A decision returning `result` and, so far, changing nothing.
    pub fn new(result: R) -> Self {
        Self {
            result,
            events: Vec::new(),
            deadlines: Vec::new(),
            cancellations: Vec::new(),
            encode_error: None,
        }
    }

    /// Appends `event`.
    pub fn emit<E: DomainEvent>(mut self, event: E) -> Self {
        match event.to_new_event() {
            Ok(event) => self.events.push(event),
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Delivers `command` again once `after` has elapsed.
    pub fn schedule<C: CommandPayload>(
        mut self,
        schedule_id: ScheduleId,
        command: &C,
        after: Duration,
    ) -> Self {
        match Command::from_payload(command) {
            Ok(command) => self.deadlines.push(DeadlineRequest {
                schedule_id,
                command,
                after,
            }),
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Cancels a previously scheduled deadline. Cancelling is advisory: a
    /// deadline already firing still reaches its handler.
    pub fn cancel(mut self, schedule_id: ScheduleId) -> Self {
        self.cancellations.push(schedule_id);
        self
    }

    pub fn result(&self) -> &R {
        &self.result
    }

    pub fn events(&self) -> &[NewEvent] {
        &self.events
    }

    pub fn deadlines(&self) -> &[DeadlineRequest] {
        &self.deadlines
    }

    pub fn cancellations(&self) -> &[ScheduleId] {
        &self.cancellations
    }

    /// Returns true if applying the decision would append nothing.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.deadlines.is_empty() && self.cancellations.is_empty()
    }

    /// Splits the decision into its parts, surfacing the first encoding failure.
    pub fn into_parts(
        self,
    ) -> Result<(R, Vec<NewEvent>, Vec<DeadlineRequest>, Vec<ScheduleId>), serde_json::Error> {
        if let Some(e) = self.encode_error {
            return Err(e);
        }
        Ok((self.result, self.events, self.deadlines, self.cancellations))
    }

    fn record_error(&mut self, error: serde_json::Error) {
        if self.encode_error.is_none() {
            self.encode_error = Some(error);
        }
    }
}
