//! Commands accepted by the rental domain.

use runtime::CommandPayload;
use serde::{Deserialize, Serialize};

use crate::ids::{BikeId, RentalId, UserId};

/// Identifies a rental request: the bike asked for and who asks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalTarget {
    pub bike_id: BikeId,
    pub user_id: UserId,
}

/// Defines a command routed to a single bike.
macro_rules! bike_command {
    ($(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub bike_id: BikeId,
            $(pub $field: $ty,)*
        }

        impl CommandPayload for $name {
            const COMMAND_TYPE: &'static str = stringify!($name);
            type Target = BikeId;

            fn target(&self) -> BikeId {
                self.bike_id.clone()
            }
        }
    };
}

bike_command!(
    /// Adds a bike to the fleet.
    RegisterBike {}
);
bike_command!(
    /// Takes a bike out of the fleet for good.
    RemoveBike {}
);
bike_command!(ConfirmPayment {
    rental_id: RentalId,
    payment_id: String,
});
bike_command!(CancelRentalRequest { rental_id: RentalId });
bike_command!(ReturnBike { rental_id: RentalId });
bike_command!(
    /// Fired by the payment deadline of a rental request.
    PaymentTimeout { rental_id: RentalId }
);

/// Reserves a bike for a user until payment or timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBikeRental {
    pub bike_id: BikeId,
    pub user_id: UserId,
}

impl CommandPayload for RequestBikeRental {
    const COMMAND_TYPE: &'static str = "RequestBikeRental";
    type Target = RentalTarget;

    fn target(&self) -> RentalTarget {
        RentalTarget {
            bike_id: self.bike_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Result of an accepted rental request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalRequestAccepted {
    pub rental_id: RentalId,
    pub bike_id: BikeId,
}
