//! Core projection trait and position tracking.

use async_trait::async_trait;
use event_store::{Event, Position};

use crate::Result;

/// Tracks how far into the log a projection has read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Log position of the last event handled, if any.
    pub last: Option<Position>,
    /// Number of events handled since the last reset.
    pub events_processed: u64,
}

impl ProjectionPosition {
    /// Creates a new position before the first event.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Advances the position past the event at `position`.
    pub fn advance(&self, position: Position) -> Self {
        Self {
            last: Some(self.last.map_or(position, |last| last.max(position))),
            events_processed: self.events_processed + 1,
        }
    }

    /// Returns true if the event at `position` was already handled.
    pub fn has_seen(&self, position: Position) -> bool {
        self.last.is_some_and(|last| position <= last)
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last {
            Some(last) => write!(f, "position({last})"),
            None => write!(f, "position(none)"),
        }
    }
}

/// A projection that processes events and updates a read model.
///
/// Subscriptions deliver at least once, so a projection must ignore events at
/// or below its current position. [`ProjectionProcessor`](crate::ProjectionProcessor)
/// already filters those out before calling [`handle`](Self::handle).
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// Handles a single event, updating the projection's read model.
    async fn handle(&self, event: &Event) -> Result<()>;

    /// Returns the current position of this projection.
    async fn position(&self) -> ProjectionPosition;

    /// Resets the projection to its initial state.
    async fn reset(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_starts_before_first_event() {
        let pos = ProjectionPosition::zero();
        assert_eq!(pos.events_processed, 0);
        assert!(!pos.has_seen(Position::first()));
    }

    #[test]
    fn position_advances() {
        let pos = ProjectionPosition::zero().advance(Position::new(3));
        assert_eq!(pos.events_processed, 1);
        assert!(pos.has_seen(Position::new(2)));
        assert!(pos.has_seen(Position::new(3)));
        assert!(!pos.has_seen(Position::new(4)));

        // A redelivered older event does not move the position back.
        let pos = pos.advance(Position::new(1));
        assert_eq!(pos.last, Some(Position::new(3)));
    }

    #[test]
    fn position_display() {
        let pos = ProjectionPosition::zero().advance(Position::new(42));
        assert_eq!(pos.to_string(), "position(42)");
        assert_eq!(ProjectionPosition::zero().to_string(), "position(none)");
    }
}
