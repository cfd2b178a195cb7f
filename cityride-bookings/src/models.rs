use cityride_rides::{Coordinates, Ride};
use cityride_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::transitions::{BookingAction, Party};

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Registered,
    Accepted,
    Confirmed,
    PaymentProcessing,
    Completed,
    Canceled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Registered,
        BookingStatus::Accepted,
        BookingStatus::Confirmed,
        BookingStatus::PaymentProcessing,
        BookingStatus::Completed,
        BookingStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Registered => "registered",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::PaymentProcessing => "payment_processing",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Canceled)
    }

    /// A passenger holding a booking in one of these states may not book the same ride again
    pub fn blocks_rebooking(&self) -> bool {
        matches!(
            self,
            BookingStatus::Registered | BookingStatus::Accepted | BookingStatus::Confirmed
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BookingError::Validation(format!("Unknown booking status: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(BookingError::Validation(format!("Unknown payment status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PickUpLocation {
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Luggage {
    #[default]
    None,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmergencyContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PassengerDetails {
    pub contact_number: Option<String>,
    pub emergency_contact: Option<EmergencyContact>,
    pub number_of_adults: i32,
    pub number_of_children: i32,
    pub special_requirements: String,
    pub luggage: Luggage,
}

impl Default for PassengerDetails {
    fn default() -> Self {
        Self {
            contact_number: None,
            emergency_contact: None,
            number_of_adults: 1,
            number_of_children: 0,
            special_requirements: String::new(),
            luggage: Luggage::None,
        }
    }
}

impl PassengerDetails {
    fn normalized(mut self) -> Result<Self, BookingError> {
        if self.number_of_adults < 0 || self.number_of_children < 0 {
            return Err(BookingError::Validation(
                "Passenger counts cannot be negative".to_string(),
            ));
        }

        self.contact_number = self.contact_number.map(|s| s.trim().to_string());
        self.special_requirements = self.special_requirements.trim().to_string();
        if let Some(contact) = self.emergency_contact.as_mut() {
            contact.name = contact.name.take().map(|s| s.trim().to_string());
            contact.phone = contact.phone.take().map(|s| s.trim().to_string());
            contact.relation = contact.relation.take().map(|s| s.trim().to_string());
        }
        Ok(self)
    }
}

/// One passenger's reservation of seats on a ride
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub passenger_id: String,
    pub seats_booked: i32,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub verification_code: Masked<String>,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub pick_up_location: Option<PickUpLocation>,
    pub passenger_details: PassengerDetails,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_PAYMENT_METHOD: &str = "Online";

impl Booking {
    /// Register a passenger against `ride`.
    ///
    /// Checks everything that can be decided from the ride alone. Whether the
    /// passenger already holds a booking on the ride, and the authoritative
    /// seat check, are settled by the store when the booking is persisted.
    pub fn register(
        ride: &Ride,
        passenger_id: &str,
        draft: NewBooking,
        verification_code: String,
    ) -> Result<Self, BookingError> {
        let (seats_booked, pick_up_location, passenger_details) = draft.validate(ride.id)?;

        if !ride.is_active() {
            return Err(BookingError::RideNotBookable);
        }

        if ride.is_driven_by(passenger_id) {
            return Err(BookingError::SelfBooking);
        }

        let available = ride.available_seats();
        if seats_booked > available {
            return Err(BookingError::InsufficientSeats { available });
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            passenger_id: passenger_id.to_string(),
            seats_booked,
            total_amount: ride.fare_for(seats_booked),
            status: BookingStatus::Registered,
            verification_code: Masked::new(verification_code),
            is_verified: false,
            verified_at: None,
            payment_status: PaymentStatus::Pending,
            payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            pick_up_location,
            passenger_details,
            completed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.passenger_id == user_id
    }
}

/// Passenger input for registering a booking
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub ride_id: Option<Uuid>,
    pub seats_booked: Option<i32>,
    pub pick_up_location: Option<PickUpLocation>,
    pub passenger_details: Option<PassengerDetails>,
}

impl NewBooking {
    fn validate(
        self,
        ride_id: Uuid,
    ) -> Result<(i32, Option<PickUpLocation>, PassengerDetails), BookingError> {
        match self.ride_id {
            Some(id) if id == ride_id => {}
            Some(_) => {
                return Err(BookingError::Validation(
                    "Ride ID does not match the requested ride".to_string(),
                ))
            }
            None => return Err(BookingError::Validation("Ride ID is required".to_string())),
        }

        let seats_booked = match self.seats_booked {
            Some(n) if n >= 1 => n,
            _ => {
                return Err(BookingError::Validation(
                    "At least 1 seat must be booked".to_string(),
                ))
            }
        };

        let passenger_details = self.passenger_details.unwrap_or_default().normalized()?;
        Ok((seats_booked, self.pick_up_location, passenger_details))
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("Not authorized to {action} this booking")]
    NotPermitted {
        action: BookingAction,
        party: Party,
    },

    #[error("{message}")]
    InvalidTransition {
        action: BookingAction,
        from: BookingStatus,
        message: String,
    },

    #[error("Invalid verification code")]
    CodeMismatch,

    #[error("Ride is not available for booking")]
    RideNotBookable,

    #[error("Cannot book your own ride")]
    SelfBooking,

    #[error("Only {available} seat(s) available")]
    InsufficientSeats {
        available: i32,
    },
}
