use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use cityride_bookings::{Booking, BookingStatus, NewBooking, PaymentStatus};
use cityride_core::{
    BookingRepository, BookingView, CoreError, InMemoryStore, LifecycleCoordinator,
    LifecycleStore, Principal, RideQuery, RideRepository, Role, StoreResult,
};
use cityride_rides::{Location, NewRide, Ride, RidePatch, RideStatus};
use cityride_shared::models::events::RideChange;
use cityride_shared::LifecycleEvent;

fn coordinator() -> (LifecycleCoordinator, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let (tx, _) = broadcast::channel(100);
    (LifecycleCoordinator::new(store.clone(), tx), store)
}

fn driver() -> Principal {
    Principal::new("driver-1", Role::Driver)
}

fn passenger(n: usize) -> Principal {
    Principal::new(format!("rider-{}", n), Role::Passenger)
}

fn ride_draft(seats: i32) -> NewRide {
    NewRide {
        origin: Some(Location { address: "Shivajinagar, Pune".to_string(), coordinates: None }),
        destination: Some(Location { address: "Lonavala".to_string(), coordinates: None }),
        departure_time: Some(Utc::now() + Duration::hours(6)),
        seats_available: Some(seats),
        price_per_seat: Some(250.0),
        ..Default::default()
    }
}

fn booking_draft(ride_id: Uuid, seats: i32) -> NewBooking {
    NewBooking { ride_id: Some(ride_id), seats_booked: Some(seats), ..Default::default() }
}

fn code_of(view: &BookingView) -> String {
    view.verification_code.as_ref().expect("passenger sees the code").expose().clone()
}

async fn booked_seats(coordinator: &LifecycleCoordinator, ride_id: Uuid) -> i32 {
    let ride = coordinator.get_ride(ride_id).await.unwrap();
    assert!(ride.ride.seats.booked_seats >= 0);
    assert!(ride.ride.seats.booked_seats <= ride.ride.seats.seats_available);
    ride.ride.seats.booked_seats
}

/// Walks a booking from registered to confirmed
async fn confirm(coordinator: &LifecycleCoordinator, booking: &BookingView) {
    coordinator.accept_booking(&driver(), booking.id).await.unwrap();
    coordinator
        .verify_booking(&driver(), booking.id, Some(code_of(booking)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_happy_path() {
    let (coordinator, _) = coordinator();
    let mut events = coordinator.subscribe();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();
    let rider = passenger(1);

    let booking = coordinator
        .create_booking(&rider, booking_draft(ride.ride.id, 2))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Registered);
    assert_eq!(booking.total_amount, 500.0);
    let code = code_of(&booking);
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 2);

    let accepted = coordinator.accept_booking(&driver(), booking.id).await.unwrap();
    assert_eq!(accepted.status, BookingStatus::Accepted);
    assert!(accepted.verification_code.is_none());

    let confirmed = coordinator
        .verify_booking(&driver(), booking.id, Some(code))
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
    assert!(confirmed.is_verified);
    assert!(confirmed.verified_at.is_some());

    let paying = coordinator
        .begin_payment(&rider, booking.id, Some("Cash".to_string()))
        .await
        .unwrap();
    assert_eq!(paying.status, BookingStatus::PaymentProcessing);
    assert_eq!(paying.payment_method, "Cash");

    let done = coordinator.finalize_booking(&driver(), booking.id).await.unwrap();
    assert_eq!(done.status, BookingStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.ride.as_ref().unwrap().status, RideStatus::Completed);

    let ride = coordinator.get_ride(ride.ride.id).await.unwrap();
    assert_eq!(ride.ride.status, RideStatus::Completed);
    assert_eq!(ride.ride.seats.booked_seats, 2);

    let mut saw_auto_complete = false;
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::RideStatusChanged(e) = event {
            if e.change == (RideChange::Completed { automatic: true }) {
                saw_auto_complete = true;
            }
        }
    }
    assert!(saw_auto_complete);
}

#[tokio::test]
async fn test_finalize_leaves_ride_active_while_other_bookings_open() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();
    let first = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    coordinator.create_booking(&passenger(2), booking_draft(ride.ride.id, 1)).await.unwrap();

    confirm(&coordinator, &first).await;
    coordinator.begin_payment(&passenger(1), first.id, None).await.unwrap();
    let done = coordinator.finalize_booking(&driver(), first.id).await.unwrap();

    assert_eq!(done.status, BookingStatus::Completed);
    assert_eq!(done.payment_method, "Online");
    assert_eq!(coordinator.get_ride(ride.ride.id).await.unwrap().ride.status, RideStatus::Active);
}

#[tokio::test]
async fn test_overbooking_rejected_sequentially() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(1)).await.unwrap();

    coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    let err = coordinator
        .create_booking(&passenger(2), booking_draft(ride.ride.id, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(err.to_string(), "Only 0 seat(s) available");
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_never_overcommit() {
    let (coordinator, store) = coordinator();
    let coordinator = Arc::new(coordinator);
    let free = 3;
    let requests = 12;
    let ride = coordinator.post_ride(&driver(), ride_draft(free)).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..requests {
        let coordinator = coordinator.clone();
        let ride_id = ride.ride.id;
        handles.push(tokio::spawn(async move {
            coordinator.create_booking(&passenger(n), booking_draft(ride_id, 1)).await
        }));
    }

    let mut succeeded = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(CoreError::Conflict(msg)) => {
                assert_eq!(msg, "Only 0 seat(s) available");
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, free);
    assert_eq!(conflicts, requests as i32 - free);
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, free);

    use cityride_core::BookingRepository;
    assert_eq!(store.list_bookings_for_ride(ride.ride.id).await.unwrap().len(), free as usize);
}

#[tokio::test]
async fn test_cancel_confirmed_booking_releases_seats() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    let rider = passenger(1);
    let booking = coordinator.create_booking(&rider, booking_draft(ride.ride.id, 2)).await.unwrap();
    confirm(&coordinator, &booking).await;
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 2);

    let canceled = coordinator.cancel_booking(&rider, booking.id).await.unwrap();
    assert_eq!(canceled.status, BookingStatus::Canceled);
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 0);
}

#[tokio::test]
async fn test_cancel_before_confirmation_keeps_seats_booked() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(4)).await.unwrap();
    let registered = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    let accepted = coordinator.create_booking(&passenger(2), booking_draft(ride.ride.id, 2)).await.unwrap();
    coordinator.accept_booking(&driver(), accepted.id).await.unwrap();

    // Only cancellations from confirmed give seats back.
    coordinator.cancel_booking(&passenger(1), registered.id).await.unwrap();
    coordinator.cancel_booking(&driver(), accepted.id).await.unwrap();
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 3);
}

#[tokio::test]
async fn test_cancel_from_payment_processing() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    let booking = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    confirm(&coordinator, &booking).await;
    coordinator.begin_payment(&passenger(1), booking.id, None).await.unwrap();

    let canceled = coordinator.cancel_booking(&driver(), booking.id).await.unwrap();
    assert_eq!(canceled.status, BookingStatus::Canceled);
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 1);

    let again = coordinator.cancel_booking(&driver(), booking.id).await.unwrap_err();
    assert_eq!(again.to_string(), "Cannot cancel a booking that is already canceled");
}

#[tokio::test]
async fn test_completion_blocked_by_open_booking() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();

    let err = coordinator.complete_ride(&driver(), ride.ride.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(coordinator.get_ride(ride.ride.id).await.unwrap().ride.status, RideStatus::Active);
}

#[tokio::test]
async fn test_complete_ride_twice() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();

    let completed = coordinator.complete_ride(&driver(), ride.ride.id).await.unwrap();
    assert_eq!(completed.ride.status, RideStatus::Completed);

    let err = coordinator.complete_ride(&driver(), ride.ride.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Ride is already completed");
    assert_eq!(coordinator.get_ride(ride.ride.id).await.unwrap().ride.status, RideStatus::Completed);
}

#[tokio::test]
async fn test_cancel_ride_cascades_to_confirmed_bookings_only() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(4)).await.unwrap();
    let confirmed = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 2)).await.unwrap();
    let registered = coordinator.create_booking(&passenger(2), booking_draft(ride.ride.id, 1)).await.unwrap();
    confirm(&coordinator, &confirmed).await;

    let result = coordinator.cancel_ride(&driver(), ride.ride.id).await.unwrap();
    assert_eq!(result.ride.ride.status, RideStatus::Canceled);
    assert_eq!(result.canceled_bookings, vec![confirmed.id]);
    // Seats are not released on the cascade.
    assert_eq!(result.ride.ride.seats.booked_seats, 3);

    let confirmed = coordinator.get_booking(&passenger(1), confirmed.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Canceled);
    // Open bookings in other states are left against the canceled ride.
    let registered = coordinator.get_booking(&passenger(2), registered.id).await.unwrap();
    assert_eq!(registered.status, BookingStatus::Registered);

    let err = coordinator
        .create_booking(&passenger(3), booking_draft(ride.ride.id, 1))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Ride is not available for booking");

    let err = coordinator.cancel_ride(&driver(), ride.ride.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Ride is already canceled");
}

#[tokio::test]
async fn test_update_ride_blocked_only_by_confirmed_bookings() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();
    let booking = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();

    // A registered booking does not block edits.
    let patch = RidePatch { price_per_seat: Some(300.0), ..Default::default() };
    let updated = coordinator.update_ride(&driver(), ride.ride.id, patch.clone()).await.unwrap();
    assert_eq!(updated.ride.price_per_seat, 300.0);
    assert_eq!(updated.ride.seats.booked_seats, 1);

    confirm(&coordinator, &booking).await;
    let err = coordinator.update_ride(&driver(), ride.ride.id, patch).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot update ride with confirmed bookings");
}

#[tokio::test]
async fn test_update_ride_cannot_shrink_below_booked() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();
    coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 2)).await.unwrap();

    let patch = RidePatch { seats_available: Some(1), ..Default::default() };
    let err = coordinator.update_ride(&driver(), ride.ride.id, patch).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 2);
}

#[tokio::test]
async fn test_verification_code_checks() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    let booking = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    let code = code_of(&booking);

    // Not yet accepted.
    let err = coordinator
        .verify_booking(&driver(), booking.id, Some(code.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Booking must be accepted before verification");

    coordinator.accept_booking(&driver(), booking.id).await.unwrap();

    let wrong = if code == "000000" { "111111" } else { "000000" };
    let err = coordinator
        .verify_booking(&driver(), booking.id, Some(wrong.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(err.to_string(), "Invalid verification code");

    let err = coordinator.verify_booking(&driver(), booking.id, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    // The passenger cannot verify their own booking.
    let err = coordinator
        .verify_booking(&passenger(1), booking.id, Some(code.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let ok = coordinator.verify_booking(&driver(), booking.id, Some(code)).await.unwrap();
    assert_eq!(ok.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_transition_authorization() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    let booking = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();

    let err = coordinator.accept_booking(&passenger(1), booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let stranger = passenger(9);
    let err = coordinator.cancel_booking(&stranger, booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));
    let err = coordinator.get_booking(&stranger, booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let err = coordinator.accept_booking(&driver(), Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_booking_creation_rules() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();

    let err = coordinator
        .create_booking(&driver(), booking_draft(ride.ride.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let err = coordinator
        .create_booking(&passenger(1), NewBooking { seats_booked: Some(1), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Ride ID is required");

    let err = coordinator
        .create_booking(&passenger(1), booking_draft(Uuid::new_v4(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    let err = coordinator
        .create_booking(&passenger(1), booking_draft(ride.ride.id, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    let err = coordinator
        .create_booking(&passenger(1), booking_draft(ride.ride.id, 1))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "You already have a booking for this ride");
}

#[tokio::test]
async fn test_rebooking_allowed_after_cancel() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();
    let first = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    coordinator.cancel_booking(&passenger(1), first.id).await.unwrap();

    let second = coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    assert_ne!(first.id, second.id);
    // The canceled registration never gave its seat back.
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 2);
}

#[tokio::test]
async fn test_ride_listing_and_ownership() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    let other = Principal::new("driver-2", Role::Driver);
    coordinator.post_ride(&other, ride_draft(2)).await.unwrap();

    let err = coordinator.post_ride(&passenger(1), ride_draft(2)).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let query = RideQuery { origin: Some("pune".to_string()), ..Default::default() };
    assert_eq!(coordinator.list_rides(&query).await.unwrap().len(), 2);
    assert_eq!(coordinator.my_rides(&driver()).await.unwrap().len(), 1);

    let err = coordinator.cancel_ride(&other, ride.ride.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();
    let bookings = coordinator.ride_bookings(&driver(), ride.ride.id).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert!(bookings[0].verification_code.is_none());

    let mine = coordinator.my_bookings(&passenger(1)).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].verification_code.is_some());
}

#[tokio::test]
async fn test_admin_listings_require_admin() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(2)).await.unwrap();
    coordinator.create_booking(&passenger(1), booking_draft(ride.ride.id, 1)).await.unwrap();

    let admin = Principal::new("ops-1", Role::Admin);
    assert_eq!(coordinator.all_rides(&admin).await.unwrap().len(), 1);
    let bookings = coordinator.all_bookings(&admin).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert!(bookings[0].verification_code.is_none());

    let err = coordinator.all_rides(&driver()).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));
}

/// Delegates to the in-memory store, running a queued competing write just
/// before the next `create_booking` or `save_booking` reaches it.
struct InterleavingStore {
    inner: Arc<InMemoryStore>,
    patch_before_create: Mutex<Option<RidePatch>>,
    booking_before_save: Mutex<Option<Booking>>,
}

impl InterleavingStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryStore::new()),
            patch_before_create: Mutex::new(None),
            booking_before_save: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RideRepository for InterleavingStore {
    async fn insert_ride(&self, ride: &Ride) -> StoreResult<()> {
        self.inner.insert_ride(ride).await
    }

    async fn get_ride(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.inner.get_ride(id).await
    }

    async fn search_rides(&self, query: &RideQuery) -> StoreResult<Vec<Ride>> {
        self.inner.search_rides(query).await
    }

    async fn list_rides_by_driver(&self, driver_id: &str) -> StoreResult<Vec<Ride>> {
        self.inner.list_rides_by_driver(driver_id).await
    }

    async fn list_rides(&self) -> StoreResult<Vec<Ride>> {
        self.inner.list_rides().await
    }

    async fn reserve_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride> {
        self.inner.reserve_seats(id, count).await
    }

    async fn release_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride> {
        self.inner.release_seats(id, count).await
    }
}

#[async_trait]
impl BookingRepository for InterleavingStore {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        self.inner.get_booking(id).await
    }

    async fn list_bookings_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>> {
        self.inner.list_bookings_for_ride(ride_id).await
    }

    async fn list_bookings_for_passenger(&self, passenger_id: &str) -> StoreResult<Vec<Booking>> {
        self.inner.list_bookings_for_passenger(passenger_id).await
    }

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>> {
        self.inner.list_bookings().await
    }
}

#[async_trait]
impl LifecycleStore for InterleavingStore {
    async fn create_booking(&self, booking: &Booking) -> StoreResult<(Booking, Ride)> {
        let patch = self.patch_before_create.lock().unwrap().take();
        if let Some(patch) = patch {
            self.inner.update_ride(booking.ride_id, &patch).await?;
        }
        self.inner.create_booking(booking).await
    }

    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: i64,
        release_seats: i32,
    ) -> StoreResult<(Booking, Ride)> {
        let competing = self.booking_before_save.lock().unwrap().take();
        if let Some(competing) = competing {
            self.inner.create_booking(&competing).await?;
        }
        self.inner.save_booking(booking, expected_version, release_seats).await
    }

    async fn update_ride(&self, id: Uuid, patch: &RidePatch) -> StoreResult<Ride> {
        self.inner.update_ride(id, patch).await
    }

    async fn cancel_ride(&self, id: Uuid) -> StoreResult<(Ride, Vec<Booking>)> {
        self.inner.cancel_ride(id).await
    }

    async fn complete_ride(&self, id: Uuid) -> StoreResult<Ride> {
        self.inner.complete_ride(id).await
    }
}

fn interleaving_coordinator() -> (LifecycleCoordinator, Arc<InterleavingStore>) {
    let store = Arc::new(InterleavingStore::new());
    let (tx, _) = broadcast::channel(100);
    (LifecycleCoordinator::new(store.clone(), tx), store)
}

fn seat_events(events: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<(i32, i32)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::SeatsChanged(e) = event {
            seen.push((e.delta, e.booked_seats));
        }
    }
    seen
}

#[tokio::test]
async fn test_booking_priced_at_committed_fare() {
    let (coordinator, store) = interleaving_coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();

    // Driver reprices between the passenger's read and the commit
    *store.patch_before_create.lock().unwrap() =
        Some(RidePatch { price_per_seat: Some(300.0), ..Default::default() });

    let booking = coordinator
        .create_booking(&passenger(1), booking_draft(ride.ride.id, 2))
        .await
        .unwrap();
    assert_eq!(booking.total_amount, 600.0);

    let stored = coordinator.get_booking(&passenger(1), booking.id).await.unwrap();
    assert_eq!(stored.total_amount, 600.0);
    assert_eq!(coordinator.get_ride(ride.ride.id).await.unwrap().ride.price_per_seat, 300.0);
}

#[tokio::test]
async fn test_seat_events_only_for_own_release() {
    let (coordinator, store) = interleaving_coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(4)).await.unwrap();
    let booking = coordinator
        .create_booking(&passenger(1), booking_draft(ride.ride.id, 1))
        .await
        .unwrap();

    let mut events = coordinator.subscribe();

    // Another passenger's booking lands while the accept is committing
    let snapshot = store.get_ride(ride.ride.id).await.unwrap().unwrap();
    let competing = Booking::register(
        &snapshot,
        "rider-2",
        booking_draft(ride.ride.id, 2),
        "135790".to_string(),
    )
    .unwrap();
    *store.booking_before_save.lock().unwrap() = Some(competing);

    coordinator.accept_booking(&driver(), booking.id).await.unwrap();
    coordinator
        .verify_booking(&driver(), booking.id, Some(code_of(&booking)))
        .await
        .unwrap();
    assert_eq!(booked_seats(&coordinator, ride.ride.id).await, 3);
    assert!(seat_events(&mut events).is_empty());

    coordinator.cancel_booking(&passenger(1), booking.id).await.unwrap();
    assert_eq!(seat_events(&mut events), vec![(-1, 2)]);
}

#[tokio::test]
async fn test_update_ride_checks_ownership_before_input() {
    let (coordinator, _) = coordinator();
    let ride = coordinator.post_ride(&driver(), ride_draft(3)).await.unwrap();
    let malformed = RidePatch { price_per_seat: Some(-10.0), ..Default::default() };

    let other_driver = Principal::new("driver-2", Role::Driver);
    let err = coordinator
        .update_ride(&other_driver, ride.ride.id, malformed.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let err = coordinator
        .update_ride(&driver(), Uuid::new_v4(), malformed.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    let err = coordinator.update_ride(&driver(), ride.ride.id, malformed).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}
