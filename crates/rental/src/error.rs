//! Rejections raised by rental command handlers.

use runtime::ValidationError;
use thiserror::Error;

use crate::ids::{BikeId, RentalId, UserId};
use crate::state::BikeStatus;

/// Errors that can occur during rental operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RentalError {
    /// A bike with this id is already part of the fleet.
    #[error("Bike {bike_id} is already registered")]
    BikeExists { bike_id: BikeId },

    /// The bike was never registered.
    #[error("Bike {bike_id} is not part of the fleet")]
    BikeNotFound { bike_id: BikeId },

    /// The bike was removed from the fleet (terminal).
    #[error("Bike {bike_id} was removed from the fleet")]
    BikeRemoved { bike_id: BikeId },

    /// The bike is waiting for a payment on another rental.
    #[error("Bike {bike_id} is already reserved")]
    BikeAlreadyReserved { bike_id: BikeId },

    /// The bike is currently rented out.
    #[error("Bike {bike_id} is not available")]
    BikeNotAvailable { bike_id: BikeId },

    /// The bike cannot leave the fleet while a rental is open on it.
    #[error("Bike {bike_id} is in use and cannot be removed")]
    BikeInUse { bike_id: BikeId },

    /// The user already has a rental that has not ended.
    #[error("User {user_id} already has open rental {rental_id}")]
    UserHasOpenRental { user_id: UserId, rental_id: RentalId },

    /// The rental is not in the state the command needs.
    #[error("Rental {rental_id} cannot {action} while the bike is {status}")]
    InvalidRentalState {
        rental_id: RentalId,
        action: &'static str,
        status: &'static str,
    },
}

impl RentalError {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            RentalError::BikeExists { .. } => "bike_exists",
            RentalError::BikeNotFound { .. } => "bike_not_found",
            RentalError::BikeRemoved { .. } => "bike_removed",
            RentalError::BikeAlreadyReserved { .. } => "bike_already_reserved",
            RentalError::BikeNotAvailable { .. } => "bike_not_available",
            RentalError::BikeInUse { .. } => "bike_in_use",
            RentalError::UserHasOpenRental { .. } => "user_has_open_rental",
            RentalError::InvalidRentalState { .. } => "invalid_rental_state",
        }
    }

    pub(crate) fn invalid_state(
        rental_id: RentalId,
        action: &'static str,
        status: &BikeStatus,
    ) -> Self {
        RentalError::InvalidRentalState {
            rental_id,
            action,
            status: status.as_str(),
        }
    }
}

impl From<RentalError> for ValidationError {
    fn from(e: RentalError) -> Self {
        ValidationError::new(e.code(), e.to_string())
    }
}
