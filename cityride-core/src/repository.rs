use async_trait::async_trait;
use uuid::Uuid;

use cityride_bookings::Booking;
use cityride_rides::{Ride, RideError, RidePatch, RideStatus};

use crate::search::RideQuery;

/// Errors raised by lifecycle storage backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Ride not found: {0}")]
    RideNotFound(Uuid),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Ride is {0}")]
    RideNotActive(RideStatus),

    #[error("Only {available} seat(s) available")]
    InsufficientSeats { available: i32 },

    #[error("You already have a booking for this ride")]
    DuplicateBooking,

    #[error("Cannot update ride with {count} confirmed booking(s)")]
    ConfirmedBookings { count: usize },

    #[error("Ride still has {count} open booking(s)")]
    OpenBookings { count: usize },

    #[error("Booking {id} was modified concurrently")]
    StaleWrite { id: Uuid },

    #[error(transparent)]
    Ride(#[from] RideError),

    #[error("Storage error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ride records. Listings come back newest first unless noted.
#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn insert_ride(&self, ride: &Ride) -> StoreResult<()>;

    async fn get_ride(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    /// Active rides matching `query`, earliest departure first
    async fn search_rides(&self, query: &RideQuery) -> StoreResult<Vec<Ride>>;

    async fn list_rides_by_driver(&self, driver_id: &str) -> StoreResult<Vec<Ride>>;

    async fn list_rides(&self) -> StoreResult<Vec<Ride>>;

    /// Atomically add `count` to the booked seats, failing when fewer are free
    async fn reserve_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride>;

    /// Atomically subtract `count` from the booked seats, clamped at zero
    async fn release_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride>;
}

/// Booking records. Listings come back newest first.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn list_bookings_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>>;

    async fn list_bookings_for_passenger(&self, passenger_id: &str) -> StoreResult<Vec<Booking>>;

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>>;
}

/// Multi-record operations that must each commit as one atomic unit.
///
/// Implementations serialize these per ride, so two of them racing on the
/// same ride observe each other's effects.
#[async_trait]
pub trait LifecycleStore: RideRepository + BookingRepository {
    /// Persist a freshly registered booking and reserve its seats.
    ///
    /// The stored `total_amount` is priced from the ride as locked for the
    /// write, not from whatever copy the booking was registered against.
    /// Fails with `RideNotActive`, `InsufficientSeats` or `DuplicateBooking`
    /// without writing anything.
    async fn create_booking(&self, booking: &Booking) -> StoreResult<(Booking, Ride)>;

    /// Replace a booking whose stored version is still `expected_version`,
    /// releasing `release_seats` on its ride in the same unit.
    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: i64,
        release_seats: i32,
    ) -> StoreResult<(Booking, Ride)>;

    /// Apply a driver edit to an active ride that has no confirmed bookings
    async fn update_ride(&self, id: Uuid, patch: &RidePatch) -> StoreResult<Ride>;

    /// Cancel an active ride and every confirmed booking on it.
    /// Returns the ride and the bookings that were canceled.
    async fn cancel_ride(&self, id: Uuid) -> StoreResult<(Ride, Vec<Booking>)>;

    /// Complete an active ride whose bookings are all terminal
    async fn complete_ride(&self, id: Uuid) -> StoreResult<Ride>;
}
