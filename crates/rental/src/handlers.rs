//! Aggregate definitions and command handlers of the rental domain.
//!
//! Fleet and payment commands need only one bike's events. A rental request
//! also has to know whether the requesting user already has a rental open,
//! so its state spans two tag namespaces: the bike's events and the user's
//! rental lifecycle events.

use std::time::Duration;

use event_store::EventCriteria;
use runtime::{AggregateDefinition, CommandRegistry, Decision, Projector};

use crate::commands::{
    CancelRentalRequest, ConfirmPayment, PaymentTimeout, RegisterBike, RemoveBike,
    RentalRequestAccepted, RentalTarget, RequestBikeRental, ReturnBike,
};
use crate::error::RentalError;
use crate::events::{
    BikeCreated, BikeRemovedFromFleet, BikeReturned, PaymentCompleted, RENTAL_LIFECYCLE,
    RentalRejectedCancellation, RentalRejectedTimeout, RentalRequested, bike_tag, rentals_tag,
};
use crate::ids::{BikeId, RentalId, UserId};
use crate::policy::RentalPolicy;
use crate::state::{BikeStatus, RentalRequestState};

/// One bike, folded from every event tagged with it.
pub fn bikes(policy: &RentalPolicy) -> AggregateDefinition<BikeStatus, BikeId> {
    AggregateDefinition::new(
        "Bike",
        BikeStatus::Unregistered,
        |bike_id: &BikeId| EventCriteria::having_tag(bike_tag(bike_id)),
        Projector::new()
            .on(BikeStatus::on_created)
            .on(BikeStatus::on_removed)
            .on(BikeStatus::on_requested)
            .on(BikeStatus::on_paid)
            .on(|s: BikeStatus, _: RentalRejectedTimeout| s.on_released())
            .on(|s: BikeStatus, _: RentalRejectedCancellation| s.on_released())
            .on(|s: BikeStatus, _: BikeReturned| s.on_released()),
    )
    .with_snapshots(policy.snapshot_every)
}

/// A bike together with the requesting user's rentals.
pub fn rental_requests() -> AggregateDefinition<RentalRequestState, RentalTarget> {
    AggregateDefinition::new(
        "RentalRequest",
        RentalRequestState::default(),
        |target: &RentalTarget| {
            EventCriteria::either([
                EventCriteria::having_tag(bike_tag(&target.bike_id)),
                EventCriteria::having_tag(rentals_tag(&target.user_id))
                    .and_being_one_of_types(RENTAL_LIFECYCLE),
            ])
        },
        Projector::new()
            .on(RentalRequestState::on_created)
            .on(RentalRequestState::on_removed)
            .on(RentalRequestState::on_requested)
            .on(RentalRequestState::on_paid)
            .on(RentalRequestState::on_timed_out)
            .on(RentalRequestState::on_cancelled)
            .on(RentalRequestState::on_returned),
    )
}

/// Registers every rental command with `registry`.
pub fn register(registry: &mut CommandRegistry, policy: &RentalPolicy) -> runtime::Result<()> {
    let bikes = bikes(policy);
    let requests = rental_requests();
    let payment_timeout = policy.payment_timeout;

    registry
        .register(&bikes, register_bike)?
        .register(&bikes, remove_bike)?
        .register(&bikes, confirm_payment)?
        .register(&bikes, cancel_rental_request)?
        .register(&bikes, return_bike)?
        .register(&bikes, expire_unpaid_rental)?
        .register(
            &requests,
            move |cmd: RequestBikeRental, state: &RentalRequestState| {
                request_rental(cmd, state, payment_timeout)
            },
        )?;
    Ok(())
}

pub fn register_bike(
    cmd: RegisterBike,
    state: &BikeStatus,
) -> Result<Decision<BikeId>, RentalError> {
    if state.is_registered() {
        return Err(RentalError::BikeExists {
            bike_id: cmd.bike_id,
        });
    }
    Ok(Decision::new(cmd.bike_id.clone()).emit(BikeCreated {
        bike_id: cmd.bike_id,
    }))
}

pub fn remove_bike(cmd: RemoveBike, state: &BikeStatus) -> Result<Decision<()>, RentalError> {
    let bike_id = cmd.bike_id;
    match state {
        BikeStatus::Available => Ok(Decision::none().emit(BikeRemovedFromFleet { bike_id })),
        BikeStatus::Unregistered => Err(RentalError::BikeNotFound { bike_id }),
        BikeStatus::Removed => Err(RentalError::BikeRemoved { bike_id }),
        BikeStatus::Reserved { .. } | BikeStatus::Rented { .. } => {
            Err(RentalError::BikeInUse { bike_id })
        }
    }
}

/// Reserves the bike and arms the payment timeout.
///
/// The timeout deadline's id is derived from the generated rental id, so
/// paying or cancelling can disarm it.
pub fn request_rental(
    cmd: RequestBikeRental,
    state: &RentalRequestState,
    payment_timeout: Duration,
) -> Result<Decision<RentalRequestAccepted>, RentalError> {
    let bike_id = cmd.bike_id;
    match state.bike(&bike_id) {
        BikeStatus::Available => {}
        BikeStatus::Removed => return Err(RentalError::BikeRemoved { bike_id }),
        BikeStatus::Unregistered => return Err(RentalError::BikeNotFound { bike_id }),
        BikeStatus::Reserved { .. } => return Err(RentalError::BikeAlreadyReserved { bike_id }),
        BikeStatus::Rented { .. } => return Err(RentalError::BikeNotAvailable { bike_id }),
    }
    if let Some(rental_id) = state.open_rental(&cmd.user_id) {
        return Err(RentalError::UserHasOpenRental {
            user_id: cmd.user_id,
            rental_id,
        });
    }

    let rental_id = RentalId::new();
    let timeout = PaymentTimeout {
        bike_id: bike_id.clone(),
        rental_id,
    };
    tracing::debug!(%rental_id, %bike_id, user_id = %cmd.user_id, "rental requested");

    Ok(Decision::new(RentalRequestAccepted {
        rental_id,
        bike_id: bike_id.clone(),
    })
    .emit(RentalRequested {
        rental_id,
        bike_id,
        user_id: cmd.user_id,
    })
    .schedule(rental_id.payment_timeout_id(), &timeout, payment_timeout))
}

pub fn confirm_payment(
    cmd: ConfirmPayment,
    state: &BikeStatus,
) -> Result<Decision<()>, RentalError> {
    let user_id = awaiting_payment(state, cmd.rental_id, "confirm payment")?;
    Ok(Decision::none()
        .emit(PaymentCompleted {
            rental_id: cmd.rental_id,
            bike_id: cmd.bike_id,
            user_id,
            payment_id: cmd.payment_id,
        })
        .cancel(cmd.rental_id.payment_timeout_id()))
}

pub fn cancel_rental_request(
    cmd: CancelRentalRequest,
    state: &BikeStatus,
) -> Result<Decision<()>, RentalError> {
    let user_id = awaiting_payment(state, cmd.rental_id, "cancel")?;
    Ok(Decision::none()
        .emit(RentalRejectedCancellation {
            rental_id: cmd.rental_id,
            bike_id: cmd.bike_id,
            user_id,
        })
        .cancel(cmd.rental_id.payment_timeout_id()))
}

pub fn return_bike(cmd: ReturnBike, state: &BikeStatus) -> Result<Decision<()>, RentalError> {
    match state {
        BikeStatus::Rented {
            rental_id, user_id, ..
        } if *rental_id == cmd.rental_id => Ok(Decision::none().emit(BikeReturned {
            rental_id: cmd.rental_id,
            bike_id: cmd.bike_id,
            user_id: user_id.clone(),
        })),
        _ => Err(RentalError::invalid_state(cmd.rental_id, "return", state)),
    }
}

/// Rejects the rental if it is still waiting for payment. Anything else
/// means the rental was settled first, and the timeout does nothing.
pub fn expire_unpaid_rental(
    cmd: PaymentTimeout,
    state: &BikeStatus,
) -> Result<Decision<()>, RentalError> {
    match state {
        BikeStatus::Reserved { rental_id, user_id } if *rental_id == cmd.rental_id => {
            tracing::info!(rental_id = %cmd.rental_id, bike_id = %cmd.bike_id, "payment timed out");
            Ok(Decision::none().emit(RentalRejectedTimeout {
                rental_id: cmd.rental_id,
                bike_id: cmd.bike_id,
                user_id: user_id.clone(),
            }))
        }
        _ => {
            tracing::debug!(rental_id = %cmd.rental_id, status = %state, "payment timeout no longer applies");
            Ok(Decision::none())
        }
    }
}

fn awaiting_payment(
    state: &BikeStatus,
    rental_id: RentalId,
    action: &'static str,
) -> Result<UserId, RentalError> {
    match state {
        BikeStatus::Reserved {
            rental_id: reserved,
            user_id,
        } if *reserved == rental_id => Ok(user_id.clone()),
        _ => Err(RentalError::invalid_state(rental_id, action, state)),
    }
}
