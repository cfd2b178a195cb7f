use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use cityride_bookings::{Booking, BookingStatus};
use cityride_rides::{InventoryError, Ride, RidePatch, RideStatus};

use crate::repository::{
    BookingRepository, LifecycleStore, RideRepository, StoreError, StoreResult,
};
use crate::search::RideQuery;

#[derive(Default)]
struct Tables {
    rides: HashMap<Uuid, Ride>,
    bookings: HashMap<Uuid, Booking>,
}

impl Tables {
    fn ride(&self, id: Uuid) -> StoreResult<&Ride> {
        self.rides.get(&id).ok_or(StoreError::RideNotFound(id))
    }

    fn ride_mut(&mut self, id: Uuid) -> StoreResult<&mut Ride> {
        self.rides.get_mut(&id).ok_or(StoreError::RideNotFound(id))
    }

    fn active_ride(&self, id: Uuid) -> StoreResult<&Ride> {
        let ride = self.ride(id)?;
        if !ride.is_active() {
            return Err(StoreError::RideNotActive(ride.status));
        }
        Ok(ride)
    }

    fn bookings_on(&self, ride_id: Uuid) -> impl Iterator<Item = &Booking> {
        self.bookings.values().filter(move |b| b.ride_id == ride_id)
    }
}

/// Process-local store. A single lock covers both tables, which makes every
/// compound operation atomic and serializes them across all rides.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(mut items: Vec<T>, created: impl Fn(&T) -> chrono::DateTime<Utc>) -> Vec<T> {
    items.sort_by(|a, b| created(b).cmp(&created(a)));
    items
}

#[async_trait]
impl RideRepository for InMemoryStore {
    async fn insert_ride(&self, ride: &Ride) -> StoreResult<()> {
        self.tables.write().await.rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn get_ride(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        Ok(self.tables.read().await.rides.get(&id).cloned())
    }

    async fn search_rides(&self, query: &RideQuery) -> StoreResult<Vec<Ride>> {
        let tables = self.tables.read().await;
        let mut rides: Vec<Ride> = tables
            .rides
            .values()
            .filter(|ride| query.matches(ride))
            .cloned()
            .collect();
        rides.sort_by_key(|ride| ride.departure_time);
        Ok(rides)
    }

    async fn list_rides_by_driver(&self, driver_id: &str) -> StoreResult<Vec<Ride>> {
        let tables = self.tables.read().await;
        let rides = tables
            .rides
            .values()
            .filter(|ride| ride.is_driven_by(driver_id))
            .cloned()
            .collect();
        Ok(newest_first(rides, |ride| ride.created_at))
    }

    async fn list_rides(&self) -> StoreResult<Vec<Ride>> {
        let tables = self.tables.read().await;
        let rides = tables.rides.values().cloned().collect();
        Ok(newest_first(rides, |ride| ride.created_at))
    }

    async fn reserve_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride> {
        let mut tables = self.tables.write().await;
        let ride = tables.ride_mut(id)?;
        ride.seats.reserve(count).map_err(reserve_error)?;
        ride.updated_at = Utc::now();
        Ok(ride.clone())
    }

    async fn release_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride> {
        let mut tables = self.tables.write().await;
        let ride = tables.ride_mut(id)?;
        ride.seats.release(count);
        ride.updated_at = Utc::now();
        Ok(ride.clone())
    }
}

fn reserve_error(err: InventoryError) -> StoreError {
    match err {
        InventoryError::InsufficientSeats { available, .. } => {
            StoreError::InsufficientSeats { available }
        }
        other => StoreError::Ride(other.into()),
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn list_bookings_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.read().await;
        let bookings = tables.bookings_on(ride_id).cloned().collect();
        Ok(newest_first(bookings, |b| b.created_at))
    }

    async fn list_bookings_for_passenger(&self, passenger_id: &str) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.read().await;
        let bookings = tables
            .bookings
            .values()
            .filter(|b| b.is_owned_by(passenger_id))
            .cloned()
            .collect();
        Ok(newest_first(bookings, |b| b.created_at))
    }

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.read().await;
        let bookings = tables.bookings.values().cloned().collect();
        Ok(newest_first(bookings, |b| b.created_at))
    }
}

#[async_trait]
impl LifecycleStore for InMemoryStore {
    async fn create_booking(&self, booking: &Booking) -> StoreResult<(Booking, Ride)> {
        let mut tables = self.tables.write().await;

        let locked = tables.active_ride(booking.ride_id)?;
        let available = locked.available_seats();
        let mut booking = booking.clone();
        booking.total_amount = locked.fare_for(booking.seats_booked);
        if booking.seats_booked > available {
            return Err(StoreError::InsufficientSeats { available });
        }

        let duplicate = tables.bookings_on(booking.ride_id).any(|b| {
            b.is_owned_by(&booking.passenger_id) && b.status.blocks_rebooking()
        });
        if duplicate {
            return Err(StoreError::DuplicateBooking);
        }

        let ride = tables.ride_mut(booking.ride_id)?;
        ride.seats.reserve(booking.seats_booked).map_err(reserve_error)?;
        ride.updated_at = Utc::now();
        let ride = ride.clone();

        tables.bookings.insert(booking.id, booking.clone());
        Ok((booking, ride))
    }

    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: i64,
        release_seats: i32,
    ) -> StoreResult<(Booking, Ride)> {
        let mut tables = self.tables.write().await;

        let stored = tables
            .bookings
            .get(&booking.id)
            .ok_or(StoreError::BookingNotFound(booking.id))?;
        if stored.version != expected_version {
            return Err(StoreError::StaleWrite { id: booking.id });
        }
        // Resolve the ride before writing so a dangling reference leaves the booking untouched.
        tables.ride(booking.ride_id)?;

        let mut saved = booking.clone();
        saved.version = expected_version + 1;
        tables.bookings.insert(saved.id, saved.clone());

        let ride = tables.ride_mut(booking.ride_id)?;
        if release_seats > 0 {
            ride.seats.release(release_seats);
            ride.updated_at = Utc::now();
        }
        Ok((saved, ride.clone()))
    }

    async fn update_ride(&self, id: Uuid, patch: &RidePatch) -> StoreResult<Ride> {
        let mut tables = self.tables.write().await;

        let mut ride = tables.active_ride(id)?.clone();
        let confirmed = tables
            .bookings_on(id)
            .filter(|b| b.status == BookingStatus::Confirmed)
            .count();
        if confirmed > 0 {
            return Err(StoreError::ConfirmedBookings { count: confirmed });
        }

        ride.apply_patch(patch)?;
        tables.rides.insert(id, ride.clone());
        Ok(ride)
    }

    async fn cancel_ride(&self, id: Uuid) -> StoreResult<(Ride, Vec<Booking>)> {
        let mut tables = self.tables.write().await;

        let mut ride = tables.active_ride(id)?.clone();
        ride.close(RideStatus::Canceled)?;
        tables.rides.insert(id, ride.clone());

        let now = Utc::now();
        let mut canceled = Vec::new();
        for booking in tables.bookings.values_mut() {
            if booking.ride_id == id && booking.status == BookingStatus::Confirmed {
                booking.status = BookingStatus::Canceled;
                booking.version += 1;
                booking.updated_at = now;
                canceled.push(booking.clone());
            }
        }
        Ok((ride, canceled))
    }

    async fn complete_ride(&self, id: Uuid) -> StoreResult<Ride> {
        let mut tables = self.tables.write().await;

        let mut ride = tables.active_ride(id)?.clone();
        let open = tables.bookings_on(id).filter(|b| !b.status.is_terminal()).count();
        if open > 0 {
            return Err(StoreError::OpenBookings { count: open });
        }

        ride.close(RideStatus::Completed)?;
        tables.rides.insert(id, ride.clone());
        Ok(ride)
    }
}
