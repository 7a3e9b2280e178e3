//! Command type to handler routing table.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use common::ScheduleId;
use event_store::{Event, EventCriteria, NewEvent, Snapshot};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::CommandPayload;
use crate::command::Command;
use crate::decision::{Decision, DeadlineRequest};
use crate::definition::AggregateDefinition;
use crate::error::{RuntimeError, ValidationError};

/// State restored from a snapshot, opaque outside the route that made it.
pub(crate) struct RestoredState(Box<dyn Any + Send>);

/// What the runtime must append and report for one handled command.
pub(crate) struct Outcome {
    pub result: serde_json::Value,
    pub events: Vec<NewEvent>,
    pub deadlines: Vec<DeadlineRequest>,
    pub cancellations: Vec<ScheduleId>,
    /// State as loaded, when enough events were folded to warrant a snapshot.
    pub snapshot: Option<serde_json::Value>,
}

/// Type-erased handler for one command type.
pub(crate) trait CommandRoute: Send + Sync {
    fn aggregate_type(&self) -> &'static str;

    fn criteria(&self, command: &Command) -> Result<EventCriteria, RuntimeError>;

    fn snapshots_enabled(&self) -> bool;

    fn restore(&self, snapshot: Snapshot) -> Result<RestoredState, serde_json::Error>;

    /// Folds `events` over the restored (or initial) state and runs the handler.
    fn decide(
        &self,
        command: &Command,
        state: Option<RestoredState>,
        events: &[Event],
    ) -> Result<Outcome, RuntimeError>;
}

struct Route<C, S, T, R, E, F> {
    definition: AggregateDefinition<S, T>,
    handler: F,
    _marker: PhantomData<fn() -> (C, R, E)>,
}

impl<C, S, T, R, E, F> CommandRoute for Route<C, S, T, R, E, F>
where
    C: CommandPayload<Target = T>,
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize,
    E: Into<ValidationError>,
    F: Fn(C, &S) -> Result<Decision<R>, E> + Send + Sync + 'static,
{
    fn aggregate_type(&self) -> &'static str {
        self.definition.name()
    }

    fn criteria(&self, command: &Command) -> Result<EventCriteria, RuntimeError> {
        let target: T = command.decode_target()?;
        Ok(self.definition.criteria_for(&target))
    }

    fn snapshots_enabled(&self) -> bool {
        self.definition.snapshot_every().is_some()
    }

    fn restore(&self, snapshot: Snapshot) -> Result<RestoredState, serde_json::Error> {
        let state: S = snapshot.into_state()?;
        Ok(RestoredState(Box::new(state)))
    }

    fn decide(
        &self,
        command: &Command,
        state: Option<RestoredState>,
        events: &[Event],
    ) -> Result<Outcome, RuntimeError> {
        let payload: C = command.decode()?;

        let initial = match state {
            Some(RestoredState(state)) => match state.downcast::<S>() {
                Ok(state) => *state,
                Err(_) => {
                    return Err(RuntimeError::Dispatch(format!(
                        "snapshot state is not a {} state",
                        self.definition.name()
                    )));
                }
            },
            None => self.definition.initial(),
        };
        let state = self.definition.projector().project(initial, events)?;

        let snapshot = match self.definition.snapshot_every() {
            Some(every) if events.len() as u64 >= every => Some(serde_json::to_value(&state)?),
            _ => None,
        };

        let decision = (self.handler)(payload, &state).map_err(|e| RuntimeError::Validation(e.into()))?;
        let (result, events, deadlines, cancellations) = decision.into_parts()?;

        Ok(Outcome {
            result: serde_json::to_value(result)?,
            events,
            deadlines,
            cancellations,
            snapshot,
        })
    }
}

/// Routing table from command type to handler, built once at startup.
///
/// ```ignore
/// let mut registry = CommandRegistry::new();
/// registry
///     .register(&bikes, handle_register_bike)?
///     .register(&bikes, handle_request_rental)?;
/// ```
#[derive(Clone, Default)]
pub struct CommandRegistry {
    routes: HashMap<&'static str, Arc<dyn CommandRoute>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("command_types", &self.command_types())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for commands of type `C` against an aggregate.
    ///
    /// Handlers are synchronous and must not perform I/O: they see the state
    /// folded from the aggregate's events and return a [`Decision`] or a
    /// rejection.
    pub fn register<C, S, T, R, E, F>(
        &mut self,
        definition: &AggregateDefinition<S, T>,
        handler: F,
    ) -> Result<&mut Self, RuntimeError>
    where
        C: CommandPayload<Target = T>,
        S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
        E: Into<ValidationError> + 'static,
        F: Fn(C, &S) -> Result<Decision<R>, E> + Send + Sync + 'static,
    {
        if self.routes.contains_key(C::COMMAND_TYPE) {
            return Err(RuntimeError::DuplicateCommand(C::COMMAND_TYPE.to_string()));
        }

        let route = Route {
            definition: definition.clone(),
            handler,
            _marker: PhantomData,
        };
        self.routes.insert(C::COMMAND_TYPE, Arc::new(route));
        tracing::debug!(
            command_type = C::COMMAND_TYPE,
            aggregate_type = definition.name(),
            "registered command handler"
        );
        Ok(self)
    }

    /// Returns true if a handler is registered for the command type.
    pub fn contains(&self, command_type: &str) -> bool {
        self.routes.contains_key(command_type)
    }

    /// Registered command types, sorted.
    pub fn command_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.routes.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub(crate) fn route(&self, command_type: &str) -> Result<Arc<dyn CommandRoute>, RuntimeError> {
        self.routes
            .get(command_type)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownCommand(command_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use common::Tag;
    use event_store::Position;
    use serde::Deserialize;

    use super::*;
    use crate::aggregate::DomainEvent;
    use crate::projector::Projector;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Opened {
        door: String,
    }

    impl DomainEvent for Opened {
        const EVENT_TYPE: &'static str = "Opened";

        fn tags(&self) -> Vec<Tag> {
            vec![Tag::new("Door", &self.door)]
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Open {
        door: String,
    }

    impl CommandPayload for Open {
        const COMMAND_TYPE: &'static str = "Open";
        type Target = String;

        fn target(&self) -> String {
            self.door.clone()
        }
    }

    fn doors() -> AggregateDefinition<bool, String> {
        AggregateDefinition::new(
            "Door",
            false,
            |door: &String| EventCriteria::having_tag(Tag::new("Door", door.as_str())),
            Projector::new().on(|_, _: Opened| true),
        )
    }

    fn open(cmd: Open, is_open: &bool) -> Result<Decision<String>, ValidationError> {
        if *is_open {
            return Err(ValidationError::new("already_open", "door is already open"));
        }
        Ok(Decision::new(cmd.door.clone()).emit(Opened { door: cmd.door }))
    }

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register(&doors(), open).unwrap();
        registry
    }

    fn open_command() -> Command {
        Command::from_payload(&Open {
            door: "front".into(),
        })
        .unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry.register(&doors(), open).unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateCommand(t) if t == "Open"));
    }

    #[test]
    fn unknown_command_type() {
        let err = registry().route("Close").err().unwrap();
        assert!(matches!(err, RuntimeError::UnknownCommand(t) if t == "Close"));
        assert_eq!(registry().command_types(), vec!["Open"]);
    }

    #[test]
    fn route_derives_criteria_from_target() {
        let route = registry().route("Open").unwrap();
        let criteria = route.criteria(&open_command()).unwrap();
        assert_eq!(criteria.lock_key(), "Door:front");
        assert_eq!(route.aggregate_type(), "Door");
    }

    #[test]
    fn decide_runs_handler_over_folded_state() {
        let route = registry().route("Open").unwrap();

        let outcome = route.decide(&open_command(), None, &[]).unwrap();
        assert_eq!(outcome.result, serde_json::json!("front"));
        assert_eq!(outcome.events.len(), 1);
        assert!(outcome.snapshot.is_none());

        let opened = Opened {
            door: "front".into(),
        }
        .to_new_event()
        .unwrap()
        .at(Position::first());
        let err = route.decide(&open_command(), None, &[opened]).err().unwrap();
        assert_eq!(err.validation().unwrap().code, "already_open");
    }

    #[test]
    fn decide_starts_from_restored_snapshot() {
        let route = registry().route("Open").unwrap();
        let snapshot = Snapshot::new("k", "Door", Position::new(3), serde_json::json!(true));

        let state = route.restore(snapshot).unwrap();
        let err = route.decide(&open_command(), Some(state), &[]).err().unwrap();
        assert!(err.is_validation());
    }
}
