//! Cross-entity lifecycle rules for rides and their bookings.
//!
//! Every mutation goes through [`LifecycleCoordinator`]: it authorizes the
//! caller, runs the pure state logic from the ride and booking crates, then
//! commits through one atomic [`LifecycleStore`] operation and announces
//! what changed on the event channel.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

use cityride_bookings::otp::generate_verification_code;
use cityride_bookings::{Booking, BookingCommand, BookingStatus, NewBooking, Party};
use cityride_rides::{NewRide, Ride, RidePatch, RideStatus};
use cityride_shared::models::events::{
    BookingTransitionedEvent, RideChange, RideStatusChangedEvent, SeatsChangedEvent,
};
use cityride_shared::LifecycleEvent;

use crate::identity::{Principal, Role};
use crate::repository::{LifecycleStore, StoreError};
use crate::search::RideQuery;
use crate::views::{BookingView, RideView};
use crate::{CoreError, CoreResult};

/// Result of a driver canceling their ride
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideCancellation {
    pub ride: RideView,
    pub canceled_bookings: Vec<Uuid>,
}

pub struct LifecycleCoordinator {
    store: Arc<dyn LifecycleStore>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleCoordinator {
    pub fn new(store: Arc<dyn LifecycleStore>, events: broadcast::Sender<LifecycleEvent>) -> Self {
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    // ==========================================
    // Rides
    // ==========================================

    pub async fn post_ride(&self, principal: &Principal, draft: NewRide) -> CoreResult<RideView> {
        principal.require_role(Role::Driver, "Only drivers can post rides")?;

        let ride = draft.into_ride(&principal.id)?;
        self.store.insert_ride(&ride).await?;

        info!("Ride {} posted by driver {}", ride.id, principal.id);
        self.publish_ride(&ride, RideChange::Posted);
        Ok(ride.into())
    }

    pub async fn list_rides(&self, query: &RideQuery) -> CoreResult<Vec<RideView>> {
        query.validate()?;
        let rides = self.store.search_rides(query).await?;
        debug!("Ride search matched {} ride(s)", rides.len());
        Ok(rides.into_iter().map(RideView::from).collect())
    }

    pub async fn get_ride(&self, ride_id: Uuid) -> CoreResult<RideView> {
        Ok(self.load_ride(ride_id).await?.into())
    }

    pub async fn my_rides(&self, principal: &Principal) -> CoreResult<Vec<RideView>> {
        principal.require_role(Role::Driver, "Only drivers can list their rides")?;
        let rides = self.store.list_rides_by_driver(&principal.id).await?;
        Ok(rides.into_iter().map(RideView::from).collect())
    }

    pub async fn update_ride(
        &self,
        principal: &Principal,
        ride_id: Uuid,
        patch: RidePatch,
    ) -> CoreResult<RideView> {
        let ride = self.load_owned_ride(principal, ride_id, "update").await?;
        patch.validate()?;

        let updated = self
            .store
            .update_ride(ride.id, &patch)
            .await
            .map_err(|err| match err {
                StoreError::RideNotActive(status) => {
                    CoreError::Conflict(format!("Cannot update a {} ride", status))
                }
                StoreError::ConfirmedBookings { .. } => CoreError::Conflict(
                    "Cannot update ride with confirmed bookings".to_string(),
                ),
                other => other.into(),
            })?;

        info!("Ride {} updated by driver {}", ride_id, principal.id);
        self.publish_ride(&updated, RideChange::Updated);
        Ok(updated.into())
    }

    /// Cancel the ride and force-cancel its confirmed bookings. Bookings in
    /// other open states stay as they are, and booked seats are left as-is
    /// since the ride no longer takes bookings.
    pub async fn cancel_ride(
        &self,
        principal: &Principal,
        ride_id: Uuid,
    ) -> CoreResult<RideCancellation> {
        let ride = self.load_owned_ride(principal, ride_id, "cancel").await?;

        let (canceled, bookings) = self
            .store
            .cancel_ride(ride.id)
            .await
            .map_err(|err| match err {
                StoreError::RideNotActive(status) => {
                    CoreError::Conflict(format!("Ride is already {}", status))
                }
                other => other.into(),
            })?;

        info!(
            "Ride {} canceled by driver {}; {} confirmed booking(s) canceled",
            ride_id,
            principal.id,
            bookings.len()
        );
        self.publish_ride(&canceled, RideChange::Canceled);
        for booking in &bookings {
            self.publish_transition(booking, Some(BookingStatus::Confirmed), &principal.id);
        }

        Ok(RideCancellation {
            ride: canceled.into(),
            canceled_bookings: bookings.iter().map(|b| b.id).collect(),
        })
    }

    pub async fn complete_ride(&self, principal: &Principal, ride_id: Uuid) -> CoreResult<RideView> {
        let ride = self.load_owned_ride(principal, ride_id, "complete").await?;

        let completed = self
            .store
            .complete_ride(ride.id)
            .await
            .map_err(|err| match err {
                StoreError::RideNotActive(RideStatus::Completed) => {
                    CoreError::Conflict("Ride is already completed".to_string())
                }
                StoreError::RideNotActive(status) => {
                    CoreError::Conflict(format!("Cannot complete a {} ride", status))
                }
                StoreError::OpenBookings { count } => CoreError::Conflict(format!(
                    "Cannot complete ride: {} booking(s) are not yet completed or canceled",
                    count
                )),
                other => other.into(),
            })?;

        info!("Ride {} completed by driver {}", ride_id, principal.id);
        self.publish_ride(&completed, RideChange::Completed { automatic: false });
        Ok(completed.into())
    }

    /// All bookings on a ride, for its driver. Verification codes are withheld.
    pub async fn ride_bookings(
        &self,
        principal: &Principal,
        ride_id: Uuid,
    ) -> CoreResult<Vec<BookingView>> {
        let ride = self.load_owned_ride(principal, ride_id, "view bookings for").await?;
        let bookings = self.store.list_bookings_for_ride(ride.id).await?;
        Ok(bookings
            .into_iter()
            .map(|booking| BookingView::new(booking, Some(&ride), false))
            .collect())
    }

    // ==========================================
    // Bookings
    // ==========================================

    pub async fn create_booking(
        &self,
        principal: &Principal,
        draft: NewBooking,
    ) -> CoreResult<BookingView> {
        principal.require_role(Role::Passenger, "Only passengers can book rides")?;

        let ride_id = draft
            .ride_id
            .ok_or_else(|| CoreError::Validation("Ride ID is required".to_string()))?;
        let ride = self.load_ride(ride_id).await?;

        let booking = Booking::register(&ride, &principal.id, draft, generate_verification_code())?;

        let (booking, ride) = self
            .store
            .create_booking(&booking)
            .await
            .map_err(|err| match err {
                StoreError::RideNotActive(_) => {
                    CoreError::Conflict("Ride is not available for booking".to_string())
                }
                other => other.into(),
            })?;

        info!(
            ride_id = %ride.id,
            booking_id = %booking.id,
            to = %booking.status,
            actor = %principal.id,
            seats = booking.seats_booked,
            "Booking registered"
        );
        self.publish_transition(&booking, None, &principal.id);
        self.publish_seats(&ride, booking.seats_booked);

        Ok(BookingView::new(booking, Some(&ride), true))
    }

    pub async fn get_booking(&self, principal: &Principal, booking_id: Uuid) -> CoreResult<BookingView> {
        let booking = self.load_booking(booking_id).await?;
        let ride = self.store.get_ride(booking.ride_id).await?;

        let is_driver = ride.as_ref().is_some_and(|r| r.is_driven_by(&principal.id));
        if !booking.is_owned_by(&principal.id) && !is_driver {
            return Err(CoreError::Authorization(
                "Not authorized to view this booking".to_string(),
            ));
        }
        Ok(BookingView::for_viewer(booking, ride.as_ref(), &principal.id))
    }

    pub async fn my_bookings(&self, principal: &Principal) -> CoreResult<Vec<BookingView>> {
        let bookings = self.store.list_bookings_for_passenger(&principal.id).await?;
        let mut views = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let ride = self.store.get_ride(booking.ride_id).await?;
            views.push(BookingView::new(booking, ride.as_ref(), true));
        }
        Ok(views)
    }

    pub async fn accept_booking(&self, principal: &Principal, booking_id: Uuid) -> CoreResult<BookingView> {
        let (booking, ride) = self.transition(principal, booking_id, BookingCommand::Accept).await?;
        Ok(BookingView::for_viewer(booking, Some(&ride), &principal.id))
    }

    /// Driver confirms pickup with the code the passenger hands over
    pub async fn verify_booking(
        &self,
        principal: &Principal,
        booking_id: Uuid,
        code: Option<String>,
    ) -> CoreResult<BookingView> {
        let command = BookingCommand::Verify { code: code.unwrap_or_default() };
        let (booking, ride) = self
            .transition(principal, booking_id, command)
            .await?;
        Ok(BookingView::for_viewer(booking, Some(&ride), &principal.id))
    }

    /// Passenger hands the booking over to payment
    pub async fn begin_payment(
        &self,
        principal: &Principal,
        booking_id: Uuid,
        payment_method: Option<String>,
    ) -> CoreResult<BookingView> {
        let (booking, ride) = self
            .transition(principal, booking_id, BookingCommand::BeginPayment { payment_method })
            .await?;
        Ok(BookingView::for_viewer(booking, Some(&ride), &principal.id))
    }

    /// Driver confirms payment. Completes the ride once every booking on it
    /// is settled.
    pub async fn finalize_booking(
        &self,
        principal: &Principal,
        booking_id: Uuid,
    ) -> CoreResult<BookingView> {
        let (booking, ride) = self.transition(principal, booking_id, BookingCommand::Finalize).await?;
        let ride = self.auto_complete(ride).await?;
        Ok(BookingView::for_viewer(booking, Some(&ride), &principal.id))
    }

    pub async fn cancel_booking(&self, principal: &Principal, booking_id: Uuid) -> CoreResult<BookingView> {
        let (booking, ride) = self.transition(principal, booking_id, BookingCommand::Cancel).await?;
        Ok(BookingView::for_viewer(booking, Some(&ride), &principal.id))
    }

    // ==========================================
    // Admin
    // ==========================================

    pub async fn all_rides(&self, principal: &Principal) -> CoreResult<Vec<RideView>> {
        principal.require_role(Role::Admin, "Admin access required")?;
        let rides = self.store.list_rides().await?;
        Ok(rides.into_iter().map(RideView::from).collect())
    }

    pub async fn all_bookings(&self, principal: &Principal) -> CoreResult<Vec<BookingView>> {
        principal.require_role(Role::Admin, "Admin access required")?;
        let bookings = self.store.list_bookings().await?;
        Ok(bookings
            .into_iter()
            .map(|booking| BookingView::new(booking, None, false))
            .collect())
    }

    // ==========================================
    // Internals
    // ==========================================

    async fn load_ride(&self, ride_id: Uuid) -> CoreResult<Ride> {
        self.store
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Ride not found".to_string()))
    }

    async fn load_owned_ride(&self, principal: &Principal, ride_id: Uuid, action: &str) -> CoreResult<Ride> {
        let ride = self.load_ride(ride_id).await?;
        if !ride.is_driven_by(&principal.id) {
            return Err(CoreError::Authorization(format!(
                "Not authorized to {} this ride",
                action
            )));
        }
        Ok(ride)
    }

    async fn load_booking(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Booking not found".to_string()))
    }

    /// Resolve the caller's party, apply `command` and commit it against the
    /// version that was read. A concurrent transition on the same booking
    /// makes the commit fail with a conflict.
    async fn transition(
        &self,
        principal: &Principal,
        booking_id: Uuid,
        command: BookingCommand,
    ) -> CoreResult<(Booking, Ride)> {
        let booking = self.load_booking(booking_id).await?;
        let ride = self
            .store
            .get_ride(booking.ride_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Ride information not found".to_string()))?;

        let party = if ride.is_driven_by(&principal.id) {
            Party::Driver
        } else if booking.is_owned_by(&principal.id) {
            Party::Passenger
        } else {
            return Err(CoreError::Authorization(format!(
                "Not authorized to {} this booking",
                command.action()
            )));
        };

        let next = booking.apply(&command, party, Utc::now()).map_err(|err| {
            debug!("Booking {} rejected {}: {}", booking.id, command.action(), err);
            CoreError::from(err)
        })?;

        let release = if booking.status == BookingStatus::Confirmed && next.status == BookingStatus::Canceled {
            booking.seats_booked
        } else {
            0
        };

        let (saved, ride_after) = self
            .store
            .save_booking(&next, booking.version, release)
            .await
            .map_err(|err| match err {
                StoreError::StaleWrite { .. } => CoreError::Conflict(
                    "Booking was modified by another request, please retry".to_string(),
                ),
                other => other.into(),
            })?;

        info!(
            ride_id = %saved.ride_id,
            booking_id = %saved.id,
            from = %booking.status,
            to = %saved.status,
            actor = %principal.id,
            action = %command.action(),
            "Booking transitioned"
        );
        self.publish_transition(&saved, Some(booking.status), &principal.id);

        if release > 0 {
            self.publish_seats(&ride_after, -release);
        }

        Ok((saved, ride_after))
    }

    /// Complete `ride` if all of its bookings are now terminal. A ride that
    /// is no longer active, or still has open bookings, is left alone.
    async fn auto_complete(&self, ride: Ride) -> CoreResult<Ride> {
        match self.store.complete_ride(ride.id).await {
            Ok(completed) => {
                info!("Ride {} completed automatically after final payment", completed.id);
                self.publish_ride(&completed, RideChange::Completed { automatic: true });
                Ok(completed)
            }
            Err(StoreError::RideNotActive(_)) | Err(StoreError::OpenBookings { .. }) => {
                debug!("Ride {} not auto-completed", ride.id);
                Ok(ride)
            }
            Err(err) => {
                error!("Auto-completion of ride {} failed: {}", ride.id, err);
                Err(err.into())
            }
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn publish_ride(&self, ride: &Ride, change: RideChange) {
        self.publish(LifecycleEvent::RideStatusChanged(RideStatusChangedEvent {
            ride_id: ride.id,
            driver_id: ride.driver_id.clone(),
            change,
            status: ride.status.to_string(),
            timestamp: Utc::now().timestamp(),
        }));
    }

    fn publish_transition(&self, booking: &Booking, from: Option<BookingStatus>, actor_id: &str) {
        self.publish(LifecycleEvent::BookingTransitioned(BookingTransitionedEvent {
            booking_id: booking.id,
            ride_id: booking.ride_id,
            passenger_id: booking.passenger_id.clone(),
            from: from.map(|s| s.to_string()),
            to: booking.status.to_string(),
            actor_id: actor_id.to_string(),
            timestamp: Utc::now().timestamp(),
        }));
    }

    fn publish_seats(&self, ride: &Ride, delta: i32) {
        self.publish(LifecycleEvent::SeatsChanged(SeatsChangedEvent {
            ride_id: ride.id,
            booked_seats: ride.seats.booked_seats,
            seats_available: ride.seats.seats_available,
            delta,
            timestamp: Utc::now().timestamp(),
        }));
    }
}
