//! Fleet read model: the current status of every bike.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use event_store::Event;
use projections::{Projection, ProjectionPosition};
use runtime::DomainEvent;
use tokio::sync::RwLock;

use crate::events::{
    BikeCreated, BikeRemovedFromFleet, BikeReturned, PaymentCompleted, RentalRejectedCancellation,
    RentalRejectedTimeout, RentalRequested,
};
use crate::ids::BikeId;
use crate::state::BikeStatus;

#[derive(Debug, Default)]
struct FleetState {
    bikes: BTreeMap<BikeId, BikeStatus>,
    position: ProjectionPosition,
}

impl FleetState {
    fn apply(&mut self, event: &Event) -> serde_json::Result<()> {
        match event.event_type.as_str() {
            BikeCreated::EVENT_TYPE => {
                let e: BikeCreated = event.decode()?;
                let bike_id = e.bike_id.clone();
                self.evolve(bike_id, |s| s.on_created(e));
            }
            BikeRemovedFromFleet::EVENT_TYPE => {
                let e: BikeRemovedFromFleet = event.decode()?;
                let bike_id = e.bike_id.clone();
                self.evolve(bike_id, |s| s.on_removed(e));
            }
            RentalRequested::EVENT_TYPE => {
                let e: RentalRequested = event.decode()?;
                let bike_id = e.bike_id.clone();
                self.evolve(bike_id, |s| s.on_requested(e));
            }
            PaymentCompleted::EVENT_TYPE => {
                let e: PaymentCompleted = event.decode()?;
                let bike_id = e.bike_id.clone();
                self.evolve(bike_id, |s| s.on_paid(e));
            }
            RentalRejectedTimeout::EVENT_TYPE => {
                let e: RentalRejectedTimeout = event.decode()?;
                self.evolve(e.bike_id, BikeStatus::on_released);
            }
            RentalRejectedCancellation::EVENT_TYPE => {
                let e: RentalRejectedCancellation = event.decode()?;
                self.evolve(e.bike_id, BikeStatus::on_released);
            }
            BikeReturned::EVENT_TYPE => {
                let e: BikeReturned = event.decode()?;
                self.evolve(e.bike_id, BikeStatus::on_released);
            }
            _ => {}
        }
        Ok(())
    }

    fn evolve(&mut self, bike_id: BikeId, evolve: impl FnOnce(BikeStatus) -> BikeStatus) {
        let status = self.bikes.remove(&bike_id).unwrap_or_default();
        self.bikes.insert(bike_id, evolve(status));
    }
}

/// Status of every bike in the fleet, kept current by a
/// [`ProjectionProcessor`](projections::ProjectionProcessor).
///
/// Clones share the same view, so one clone can be registered with the
/// processor while another answers queries.
#[derive(Debug, Clone, Default)]
pub struct FleetView {
    state: Arc<RwLock<FleetState>>,
}

impl FleetView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of one bike; unknown bikes are unregistered.
    pub async fn status(&self, bike_id: &BikeId) -> BikeStatus {
        self.state
            .read()
            .await
            .bikes
            .get(bike_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Bikes that can be rented right now, in id order.
    pub async fn available_bikes(&self) -> Vec<BikeId> {
        self.state
            .read()
            .await
            .bikes
            .iter()
            .filter(|(_, status)| status.is_available())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of bikes ever registered, removed ones included.
    pub async fn fleet_size(&self) -> usize {
        self.state.read().await.bikes.len()
    }
}

#[async_trait]
impl Projection for FleetView {
    fn name(&self) -> &'static str {
        "FleetView"
    }

    async fn handle(&self, event: &Event) -> projections::Result<()> {
        let mut state = self.state.write().await;
        state.apply(event)?;
        state.position = state.position.advance(event.position);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> projections::Result<()> {
        *self.state.write().await = FleetState::default();
        Ok(())
    }
}
