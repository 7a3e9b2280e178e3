//! Bike and rental request state machines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::{
    BikeCreated, BikeRemovedFromFleet, BikeReturned, PaymentCompleted, RentalRejectedCancellation,
    RentalRejectedTimeout, RentalRequested,
};
use crate::ids::{BikeId, RentalId, UserId};

/// The state of one bike.
///
/// State transitions:
/// ```text
/// Unregistered ──► Available ──► Reserved ──► Rented
///                   │  ▲  ▲         │           │
///                   │  │  └─────────┘           │
///                   │  └────────────────────────┘
///                   └──► Removed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BikeStatus {
    /// No `BikeCreated` event yet.
    #[default]
    Unregistered,

    /// In the fleet and free to rent.
    Available,

    /// Requested by a user, awaiting payment.
    Reserved { rental_id: RentalId, user_id: UserId },

    /// Paid for and out on the road.
    Rented {
        rental_id: RentalId,
        user_id: UserId,
        payment_id: String,
    },

    /// Removed from the fleet (terminal state).
    Removed,
}

impl BikeStatus {
    pub fn is_registered(&self) -> bool {
        !matches!(self, BikeStatus::Unregistered)
    }

    pub fn is_available(&self) -> bool {
        matches!(self, BikeStatus::Available)
    }

    /// The open rental on this bike, if any.
    pub fn rental(&self) -> Option<RentalId> {
        match self {
            BikeStatus::Reserved { rental_id, .. } | BikeStatus::Rented { rental_id, .. } => {
                Some(*rental_id)
            }
            _ => None,
        }
    }

    /// Returns true if the bike is reserved for `rental_id` and unpaid.
    pub fn awaits_payment_for(&self, rental_id: RentalId) -> bool {
        matches!(self, BikeStatus::Reserved { rental_id: r, .. } if *r == rental_id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BikeStatus::Unregistered => "unregistered",
            BikeStatus::Available => "available",
            BikeStatus::Reserved { .. } => "reserved",
            BikeStatus::Rented { .. } => "rented",
            BikeStatus::Removed => "removed",
        }
    }

    pub(crate) fn on_created(self, _: BikeCreated) -> Self {
        BikeStatus::Available
    }

    pub(crate) fn on_removed(self, _: BikeRemovedFromFleet) -> Self {
        BikeStatus::Removed
    }

    pub(crate) fn on_requested(self, e: RentalRequested) -> Self {
        BikeStatus::Reserved {
            rental_id: e.rental_id,
            user_id: e.user_id,
        }
    }

    pub(crate) fn on_paid(self, e: PaymentCompleted) -> Self {
        BikeStatus::Rented {
            rental_id: e.rental_id,
            user_id: e.user_id,
            payment_id: e.payment_id,
        }
    }

    /// A rental ended without a later transition taking the bike elsewhere.
    pub(crate) fn on_released(self) -> Self {
        match self {
            BikeStatus::Removed => BikeStatus::Removed,
            _ => BikeStatus::Available,
        }
    }
}

impl std::fmt::Display for BikeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rental request has to check: the requested bike, and whether the
/// requesting user already has a rental open.
///
/// It is folded from the bike's events and the user's rental events, so it
/// may also see rental events of other bikes and other users. Those only
/// touch their own entries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RentalRequestState {
    bikes: BTreeMap<BikeId, BikeStatus>,
    open_rentals: BTreeMap<UserId, RentalId>,
}

impl RentalRequestState {
    /// Status of `bike_id` as far as this state has seen it.
    pub fn bike(&self, bike_id: &BikeId) -> BikeStatus {
        self.bikes.get(bike_id).cloned().unwrap_or_default()
    }

    /// The rental of `user_id` that has not ended yet, if any.
    pub fn open_rental(&self, user_id: &UserId) -> Option<RentalId> {
        self.open_rentals.get(user_id).copied()
    }

    fn update(mut self, bike_id: BikeId, evolve: impl FnOnce(BikeStatus) -> BikeStatus) -> Self {
        let status = self.bikes.remove(&bike_id).unwrap_or_default();
        self.bikes.insert(bike_id, evolve(status));
        self
    }

    fn close(mut self, user_id: &UserId, rental_id: RentalId) -> Self {
        if self.open_rentals.get(user_id) == Some(&rental_id) {
            self.open_rentals.remove(user_id);
        }
        self
    }

    pub(crate) fn on_created(self, e: BikeCreated) -> Self {
        let bike_id = e.bike_id.clone();
        self.update(bike_id, |s| s.on_created(e))
    }

    pub(crate) fn on_removed(self, e: BikeRemovedFromFleet) -> Self {
        let bike_id = e.bike_id.clone();
        self.update(bike_id, |s| s.on_removed(e))
    }

    pub(crate) fn on_requested(self, e: RentalRequested) -> Self {
        let rental_id = e.rental_id;
        let user_id = e.user_id.clone();
        let mut state = self.update(e.bike_id.clone(), |s| s.on_requested(e));
        state.open_rentals.insert(user_id, rental_id);
        state
    }

    pub(crate) fn on_paid(self, e: PaymentCompleted) -> Self {
        self.update(e.bike_id.clone(), |s| s.on_paid(e))
    }

    pub(crate) fn on_timed_out(self, e: RentalRejectedTimeout) -> Self {
        self.update(e.bike_id, BikeStatus::on_released)
            .close(&e.user_id, e.rental_id)
    }

    pub(crate) fn on_cancelled(self, e: RentalRejectedCancellation) -> Self {
        self.update(e.bike_id, BikeStatus::on_released)
            .close(&e.user_id, e.rental_id)
    }

    pub(crate) fn on_returned(self, e: BikeReturned) -> Self {
        self.update(e.bike_id, BikeStatus::on_released)
            .close(&e.user_id, e.rental_id)
    }
}
