use uuid::Uuid;

/// Published after a ride's status or editable fields change.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct RideStatusChangedEvent {
    pub ride_id: Uuid,
    pub driver_id: String,
    pub change: RideChange,
    pub status: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideChange {
    Posted,
    Updated,
    Canceled,
    Completed { automatic: bool },
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct BookingTransitionedEvent {
    pub booking_id: Uuid,
    pub ride_id: Uuid,
    pub passenger_id: String,
    pub from: Option<String>, // None on creation
    pub to: String,
    pub actor_id: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct SeatsChangedEvent {
    pub ride_id: Uuid,
    pub booked_seats: i32,
    pub seats_available: i32,
    pub delta: i32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RideStatusChanged(RideStatusChangedEvent),
    BookingTransitioned(BookingTransitionedEvent),
    SeatsChanged(SeatsChangedEvent),
}

impl LifecycleEvent {
    pub fn ride_id(&self) -> Uuid {
        match self {
            LifecycleEvent::RideStatusChanged(e) => e.ride_id,
            LifecycleEvent::BookingTransitioned(e) => e.ride_id,
            LifecycleEvent::SeatsChanged(e) => e.ride_id,
        }
    }
}
