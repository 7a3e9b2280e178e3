//! Deterministic state reconstruction from events.

use std::collections::HashMap;
use std::fmt;

use event_store::Event;

use crate::aggregate::DomainEvent;
use crate::error::RuntimeError;

type EvolveFn<S> = Box<dyn Fn(S, &Event) -> Result<S, serde_json::Error> + Send + Sync>;

/// Folds events into a state through a table of per-event-type evolve
/// functions.
///
/// Events whose type has no registered function are skipped. Evolve
/// functions must be pure: projecting the same sequence twice yields the
/// same state.
///
/// ```
/// use common::Tag;
/// use runtime::{DomainEvent, Projector};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Incremented { by: i64 }
///
/// impl DomainEvent for Incremented {
///     const EVENT_TYPE: &'static str = "Incremented";
///     fn tags(&self) -> Vec<Tag> { vec![Tag::new("Counter", "c")] }
/// }
///
/// let projector = Projector::new().on(|total: i64, e: Incremented| total + e.by);
/// assert!(projector.handles("Incremented"));
/// ```
pub struct Projector<S> {
    evolvers: HashMap<&'static str, EvolveFn<S>>,
}

impl<S> Default for Projector<S> {
    fn default() -> Self {
        Self {
            evolvers: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for Projector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.evolvers.keys().collect();
        types.sort();
        f.debug_struct("Projector").field("event_types", &types).finish()
    }
}

impl<S: 'static> Projector<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the evolve function for events of type `E`.
    ///
    /// Registering the same event type twice replaces the earlier function.
    pub fn on<E, F>(mut self, evolve: F) -> Self
    where
        E: DomainEvent,
        F: Fn(S, E) -> S + Send + Sync + 'static,
    {
        self.evolvers.insert(
            E::EVENT_TYPE,
            Box::new(move |state: S, event: &Event| Ok(evolve(state, event.decode::<E>()?))),
        );
        self
    }

    /// Returns true if an evolve function is registered for the event type.
    pub fn handles(&self, event_type: &str) -> bool {
        self.evolvers.contains_key(event_type)
    }

    /// Event types with a registered evolve function, sorted.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.evolvers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Applies a single event. Unregistered types leave the state unchanged.
    pub fn apply(&self, state: S, event: &Event) -> Result<S, RuntimeError> {
        match self.evolvers.get(event.event_type.as_str()) {
            Some(evolve) => evolve(state, event).map_err(|source| RuntimeError::Decode {
                event_type: event.event_type.clone(),
                position: event.position,
                source,
            }),
            None => Ok(state),
        }
    }

    /// Folds the events, in the order given, starting from `initial`.
    pub fn project<'a>(
        &self,
        initial: S,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Result<S, RuntimeError> {
        events
            .into_iter()
            .try_fold(initial, |state, event| self.apply(state, event))
    }
}
