use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cityride_bookings::{Booking, BookingStatus, PassengerDetails, PaymentStatus, PickUpLocation};
use cityride_rides::{Location, Ride, RideStatus};
use cityride_shared::Masked;

/// A ride as returned to callers, with the derived free-seat count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideView {
    #[serde(flatten)]
    pub ride: Ride,
    pub available_seats: i32,
}

impl From<Ride> for RideView {
    fn from(ride: Ride) -> Self {
        let available_seats = ride.available_seats();
        Self { ride, available_seats }
    }
}

/// The slice of a ride embedded in booking responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideSummary {
    pub id: Uuid,
    pub driver_id: String,
    pub origin: Location,
    pub destination: Location,
    pub departure_time: DateTime<Utc>,
    pub price_per_seat: f64,
    pub status: RideStatus,
}

impl From<&Ride> for RideSummary {
    fn from(ride: &Ride) -> Self {
        Self {
            id: ride.id,
            driver_id: ride.driver_id.clone(),
            origin: ride.origin.clone(),
            destination: ride.destination.clone(),
            departure_time: ride.departure_time,
            price_per_seat: ride.price_per_seat,
            status: ride.status,
        }
    }
}

/// A booking as returned to one particular caller.
///
/// The verification code is only present when the caller is the passenger
/// who holds the booking; drivers learn it from the passenger at pickup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub passenger_id: String,
    pub seats_booked: i32,
    pub total_amount: f64,
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<Masked<String>>,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub pick_up_location: Option<PickUpLocation>,
    pub passenger_details: PassengerDetails,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ride: Option<RideSummary>,
}

impl BookingView {
    pub fn new(booking: Booking, ride: Option<&Ride>, reveal_code: bool) -> Self {
        Self {
            id: booking.id,
            ride_id: booking.ride_id,
            passenger_id: booking.passenger_id,
            seats_booked: booking.seats_booked,
            total_amount: booking.total_amount,
            status: booking.status,
            verification_code: reveal_code.then_some(booking.verification_code),
            is_verified: booking.is_verified,
            verified_at: booking.verified_at,
            payment_status: booking.payment_status,
            payment_method: booking.payment_method,
            pick_up_location: booking.pick_up_location,
            passenger_details: booking.passenger_details,
            completed_at: booking.completed_at,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
            ride: ride.map(RideSummary::from),
        }
    }

    /// The view for `viewer_id`, revealing the code only to the booking's passenger
    pub fn for_viewer(booking: Booking, ride: Option<&Ride>, viewer_id: &str) -> Self {
        let reveal = booking.is_owned_by(viewer_id);
        Self::new(booking, ride, reveal)
    }
}
