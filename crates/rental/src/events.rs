//! Rental domain events.
//!
//! Fleet events are tagged with the bike only. Rental lifecycle events are
//! also tagged `Rental:<user>`, so the rentals of one user can be selected
//! without knowing which bikes they took.

use common::Tag;
use runtime::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::ids::{BikeId, RentalId, UserId};

pub(crate) fn bike_tag(bike_id: &BikeId) -> Tag {
    Tag::new("Bike", bike_id.as_str())
}

pub(crate) fn rentals_tag(user_id: &UserId) -> Tag {
    Tag::new("Rental", user_id.as_str())
}

/// Event types that start, advance or end a rental.
pub const RENTAL_LIFECYCLE: [&str; 5] = [
    RentalRequested::EVENT_TYPE,
    RentalRejectedTimeout::EVENT_TYPE,
    RentalRejectedCancellation::EVENT_TYPE,
    PaymentCompleted::EVENT_TYPE,
    BikeReturned::EVENT_TYPE,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeCreated {
    pub bike_id: BikeId,
}

impl DomainEvent for BikeCreated {
    const EVENT_TYPE: &'static str = "BikeCreated";

    fn tags(&self) -> Vec<Tag> {
        vec![bike_tag(&self.bike_id)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeRemovedFromFleet {
    pub bike_id: BikeId,
}

impl DomainEvent for BikeRemovedFromFleet {
    const EVENT_TYPE: &'static str = "BikeRemovedFromFleet";

    fn tags(&self) -> Vec<Tag> {
        vec![bike_tag(&self.bike_id)]
    }
}

/// Defines a rental lifecycle event carrying the rental, bike and user ids.
macro_rules! rental_event {
    ($(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub rental_id: RentalId,
            pub bike_id: BikeId,
            pub user_id: UserId,
            $(pub $field: $ty,)*
        }

        impl DomainEvent for $name {
            const EVENT_TYPE: &'static str = stringify!($name);

            fn tags(&self) -> Vec<Tag> {
                vec![bike_tag(&self.bike_id), rentals_tag(&self.user_id)]
            }
        }
    };
}

rental_event!(
    /// A user reserved a bike; payment is due before the timeout.
    RentalRequested {}
);
rental_event!(
    /// No payment arrived in time.
    RentalRejectedTimeout {}
);
rental_event!(
    /// The user withdrew the request before paying.
    RentalRejectedCancellation {}
);
rental_event!(PaymentCompleted { payment_id: String });
rental_event!(BikeReturned {});
