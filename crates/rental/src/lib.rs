//! Bike rental on the aggregate runtime.
//!
//! Bikes are registered into a fleet and rented by users. A rental request
//! reserves the bike and schedules a payment timeout; paying or cancelling
//! disarms it, and a timeout that fires after either is a no-op.
//!
//! ```ignore
//! let mut registry = CommandRegistry::new();
//! rental::register(&mut registry, &RentalPolicy::from_env())?;
//! ```

pub mod commands;
pub mod error;
pub mod events;
pub mod fleet;
pub mod handlers;
pub mod ids;
pub mod policy;
pub mod state;

pub use commands::{
    CancelRentalRequest, ConfirmPayment, PaymentTimeout, RegisterBike, RemoveBike,
    RentalRequestAccepted, RentalTarget, RequestBikeRental, ReturnBike,
};
pub use error::RentalError;
pub use fleet::FleetView;
pub use handlers::{bikes, register, rental_requests};
pub use ids::{BikeId, RentalId, UserId};
pub use policy::RentalPolicy;
pub use state::{BikeStatus, RentalRequestState};
