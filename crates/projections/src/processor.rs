//! Projection processor for feeding events to projections.

use event_store::{Event, EventLog, Position};
use futures_util::StreamExt;
use tokio::sync::watch;

use crate::Result;
use crate::projection::Projection;

/// Processes events from an event log and delivers them to projections.
///
/// The processor supports:
/// - Catch-up: replays the log from the lowest projection position
/// - Live: follows the log's subscription until shut down
/// - Single event delivery: delivers one event to every projection that has not seen it
/// - Rebuild: resets all projections and replays from scratch
pub struct ProjectionProcessor<L: EventLog> {
    log: L,
    projections: Vec<Box<dyn Projection>>,
}

impl<L: EventLog> ProjectionProcessor<L> {
    /// Creates a new processor over the given event log.
    pub fn new(log: L) -> Self {
        Self {
            log,
            projections: Vec::new(),
        }
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Lowest position reached by any registered projection.
    async fn low_water_mark(&self) -> Option<Position> {
        let mut low: Option<Option<Position>> = None;
        for projection in &self.projections {
            let last = projection.position().await.last;
            low = Some(match low {
                Some(current) => current.min(last),
                None => last,
            });
        }
        low.flatten()
    }

    /// Runs catch-up processing: streams the log from the lowest projection
    /// position and delivers each event to the projections that have not
    /// seen it yet.
    ///
    /// Returns the position of the last event read, if any.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<Option<Position>> {
        let mut stream = self.log.read_all_after(self.low_water_mark().await).await?;
        let mut last = None;
        let mut delivered: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            delivered += self.deliver(&event).await?;
            last = Some(event.position);
        }

        tracing::info!(events_delivered = delivered, ?last, "catch-up complete");

        Ok(last)
    }

    /// Delivers a single event to all registered projections that have not
    /// seen it yet.
    #[tracing::instrument(
        skip(self, event),
        fields(event_type = %event.event_type, position = %event.position)
    )]
    pub async fn process_event(&self, event: &Event) -> Result<()> {
        self.deliver(event).await?;
        Ok(())
    }

    /// Resets all projections and replays all events from the log.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.run_catch_up().await?;
        Ok(())
    }

    /// Follows the log until `shutdown` turns true.
    ///
    /// The subscription starts right after the lowest projection position,
    /// so history not yet seen is delivered first. Subscription errors are
    /// logged and skipped; projection errors stop the processor.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run_live(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if *shutdown.borrow() {
            return Ok(());
        }
        let from = self
            .low_water_mark()
            .await
            .map_or(Position::first(), |last| last.next());
        let mut stream = self.log.subscribe(from).await?;
        tracing::info!(
            %from,
            projections = self.projections.len(),
            "projections following the log"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => self.process_event(&event).await?,
                    Some(Err(e)) => tracing::warn!(error = %e, "subscription error, continuing"),
                    None => break,
                },
            }
        }

        tracing::info!("projections stopped");
        Ok(())
    }

    async fn deliver(&self, event: &Event) -> Result<u64> {
        let mut delivered = 0;
        for projection in &self.projections {
            if projection.position().await.has_seen(event.position) {
                continue;
            }
            projection.handle(event).await?;
            metrics::counter!("projections_events_processed", "projection" => projection.name())
                .increment(1);
            delivered += 1;
        }
        Ok(delivered)
    }
}
