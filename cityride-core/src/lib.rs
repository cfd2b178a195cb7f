pub mod coordinator;
pub mod identity;
pub mod memory;
pub mod repository;
pub mod search;
pub mod views;

pub use coordinator::{LifecycleCoordinator, RideCancellation};
pub use identity::{Principal, Role};
pub use memory::InMemoryStore;
pub use repository::{BookingRepository, LifecycleStore, RideRepository, StoreError, StoreResult};
pub use search::RideQuery;
pub use views::{BookingView, RideSummary, RideView};

use cityride_bookings::BookingError;
use cityride_rides::{InventoryError, RideError};

/// Failure categories surfaced to callers. Every variant maps onto exactly
/// one transport status in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal service error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::Authorization(_) => "authorization_error",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Internal(_) => "internal_error",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<RideError> for CoreError {
    fn from(err: RideError) -> Self {
        match err {
            RideError::Validation(msg) => CoreError::Validation(msg),
            RideError::InvalidTransition { from, .. } => {
                CoreError::Conflict(format!("Ride is already {}", from))
            }
            RideError::Inventory(InventoryError::InvalidCount(_)) => {
                CoreError::Validation(err.to_string())
            }
            RideError::Inventory(_) => CoreError::Conflict(err.to_string()),
        }
    }
}

impl From<BookingError> for CoreError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(msg) => CoreError::Validation(msg),
            BookingError::NotPermitted { .. } => CoreError::Authorization(err.to_string()),
            BookingError::InvalidTransition { .. }
            | BookingError::CodeMismatch
            | BookingError::RideNotBookable
            | BookingError::SelfBooking
            | BookingError::InsufficientSeats { .. } => CoreError::Conflict(err.to_string()),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RideNotFound(_) => CoreError::NotFound("Ride not found".to_string()),
            StoreError::BookingNotFound(_) => CoreError::NotFound("Booking not found".to_string()),
            StoreError::Ride(inner) => CoreError::from(inner),
            StoreError::Backend(msg) => CoreError::Internal(msg),
            StoreError::RideNotActive(_)
            | StoreError::InsufficientSeats { .. }
            | StoreError::DuplicateBooking
            | StoreError::ConfirmedBookings { .. }
            | StoreError::OpenBookings { .. }
            | StoreError::StaleWrite { .. } => CoreError::Conflict(err.to_string()),
        }
    }
}
