use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use cityride_bookings::{Booking, BookingStatus, PassengerDetails, PaymentStatus, PickUpLocation};
use cityride_core::StoreError;
use cityride_rides::{Location, Ride, RideStatus, RouteInfo, SeatInventory, VehicleType};
use cityride_shared::Masked;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RideRow {
    pub id: Uuid,
    pub driver_id: String,
    pub origin: Json<Location>,
    pub destination: Json<Location>,
    pub departure_time: DateTime<Utc>,
    pub seats_available: i32,
    pub booked_seats: i32,
    pub price_per_seat: f64,
    pub vehicle_type: String,
    pub description: String,
    pub route: Option<Json<RouteInfo>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = StoreError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        let vehicle_type: VehicleType = row.vehicle_type.parse().map_err(|e| corrupt("ride", row.id, e))?;
        let status: RideStatus = row.status.parse().map_err(|e| corrupt("ride", row.id, e))?;

        Ok(Ride {
            id: row.id,
            driver_id: row.driver_id,
            origin: row.origin.0,
            destination: row.destination.0,
            departure_time: row.departure_time,
            seats: SeatInventory {
                seats_available: row.seats_available,
                booked_seats: row.booked_seats,
            },
            price_per_seat: row.price_per_seat,
            vehicle_type,
            description: row.description,
            route: row.route.map(|r| r.0),
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookingRow {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub passenger_id: String,
    pub seats_booked: i32,
    pub total_amount: f64,
    pub status: String,
    pub verification_code: String,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub payment_status: String,
    pub payment_method: String,
    pub pick_up_location: Option<Json<PickUpLocation>>,
    pub passenger_details: Json<PassengerDetails>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status: BookingStatus = row.status.parse().map_err(|e| corrupt("booking", row.id, e))?;
        let payment_status: PaymentStatus =
            row.payment_status.parse().map_err(|e| corrupt("booking", row.id, e))?;

        Ok(Booking {
            id: row.id,
            ride_id: row.ride_id,
            passenger_id: row.passenger_id,
            seats_booked: row.seats_booked,
            total_amount: row.total_amount,
            status,
            verification_code: Masked::new(row.verification_code),
            is_verified: row.is_verified,
            verified_at: row.verified_at,
            payment_status,
            payment_method: row.payment_method,
            pick_up_location: row.pick_up_location.map(|p| p.0),
            passenger_details: row.passenger_details.0,
            completed_at: row.completed_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt(entity: &str, id: Uuid, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("Unreadable {} row {}: {}", entity, id, err))
}

pub(crate) fn rides(rows: Vec<RideRow>) -> Result<Vec<Ride>, StoreError> {
    rows.into_iter().map(Ride::try_from).collect()
}

pub(crate) fn bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}
