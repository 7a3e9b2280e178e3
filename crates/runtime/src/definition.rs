//! Per-aggregate registration: state, criteria and projector.

use std::fmt;
use std::sync::Arc;

use event_store::{Event, EventCriteria};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::RuntimeError;
use crate::projector::Projector;

/// Everything the runtime needs to rebuild one kind of aggregate state.
///
/// `S` is the state, `T` the target identifier shared by every command of the
/// aggregate. The definition is cheap to clone and is shared by every command
/// registered against it.
pub struct AggregateDefinition<S, T> {
    name: &'static str,
    initial: S,
    criteria: Arc<dyn Fn(&T) -> EventCriteria + Send + Sync>,
    projector: Arc<Projector<S>>,
    snapshot_every: Option<u64>,
}

impl<S: Clone, T> Clone for AggregateDefinition<S, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            initial: self.initial.clone(),
            criteria: Arc::clone(&self.criteria),
            projector: Arc::clone(&self.projector),
            snapshot_every: self.snapshot_every,
        }
    }
}

impl<S: fmt::Debug, T> fmt::Debug for AggregateDefinition<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateDefinition")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("projector", &self.projector)
            .field("snapshot_every", &self.snapshot_every)
            .finish()
    }
}

impl<S, T> AggregateDefinition<S, T>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    T: 'static,
{
    /// Creates a definition.
    ///
    /// `criteria` must be deterministic: the same target always selects the
    /// same events.
    pub fn new<F>(name: &'static str, initial: S, criteria: F, projector: Projector<S>) -> Self
    where
        F: Fn(&T) -> EventCriteria + Send + Sync + 'static,
    {
        Self {
            name,
            initial,
            criteria: Arc::new(criteria),
            projector: Arc::new(projector),
            snapshot_every: None,
        }
    }

    /// Enables snapshots: once `every` events have been folded since the last
    /// snapshot, the loaded state is saved so later loads read only the suffix.
    pub fn with_snapshots(mut self, every: u64) -> Self {
        self.snapshot_every = (every > 0).then_some(every);
        self
    }

    /// Aggregate type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A fresh copy of the initial state.
    pub fn initial(&self) -> S {
        self.initial.clone()
    }

    /// Event criteria for a target identifier.
    pub fn criteria_for(&self, target: &T) -> EventCriteria {
        (self.criteria)(target)
    }

    pub fn projector(&self) -> &Projector<S> {
        &self.projector
    }

    pub fn snapshot_every(&self) -> Option<u64> {
        self.snapshot_every
    }

    /// Folds matching events, in position order, from the initial state.
    pub fn project<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> Result<S, RuntimeError> {
        self.projector.project(self.initial(), events)
    }
}
