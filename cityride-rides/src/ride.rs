use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::inventory::{InventoryError, SeatInventory};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteInfo {
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub polyline: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum VehicleType {
    #[default]
    Car,
    Bike,
    Bus,
    Van,
    #[serde(rename = "SUV")]
    Suv,
    Auto,
    Other,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "Car",
            VehicleType::Bike => "Bike",
            VehicleType::Bus => "Bus",
            VehicleType::Van => "Van",
            VehicleType::Suv => "SUV",
            VehicleType::Auto => "Auto",
            VehicleType::Other => "Other",
        }
    }
}

impl FromStr for VehicleType {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Car" => Ok(VehicleType::Car),
            "Bike" => Ok(VehicleType::Bike),
            "Bus" => Ok(VehicleType::Bus),
            "Van" => Ok(VehicleType::Van),
            "SUV" => Ok(VehicleType::Suv),
            "Auto" => Ok(VehicleType::Auto),
            "Other" => Ok(VehicleType::Other),
            other => Err(RideError::Validation(format!("Unknown vehicle type: {}", other))),
        }
    }
}

/// Ride status in the lifecycle. `Completed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Active,
    Completed,
    Canceled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Active => "active",
            RideStatus::Completed => "completed",
            RideStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RideStatus::Active)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RideStatus::Active),
            "completed" => Ok(RideStatus::Completed),
            "canceled" => Ok(RideStatus::Canceled),
            other => Err(RideError::Validation(format!("Unknown ride status: {}", other))),
        }
    }
}

/// A driver-posted trip offering a fixed number of seats at a price
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: Uuid,
    pub driver_id: String,
    pub origin: Location,
    pub destination: Location,
    pub departure_time: DateTime<Utc>,
    #[serde(flatten)]
    pub seats: SeatInventory,
    pub price_per_seat: f64,
    pub vehicle_type: VehicleType,
    pub description: String,
    pub route: Option<RouteInfo>,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn is_active(&self) -> bool {
        self.status == RideStatus::Active
    }

    pub fn is_driven_by(&self, user_id: &str) -> bool {
        self.driver_id == user_id
    }

    pub fn available_seats(&self) -> i32 {
        self.seats.free()
    }

    /// Price of `seats` seats at the ride's current rate
    pub fn fare_for(&self, seats: i32) -> f64 {
        seats as f64 * self.price_per_seat
    }

    /// Apply a driver edit. Only the fields present in the patch change.
    pub fn apply_patch(&mut self, patch: &RidePatch) -> Result<(), RideError> {
        patch.validate()?;

        if let Some(seats_available) = patch.seats_available {
            self.seats.resize(seats_available)?;
        }
        if let Some(origin) = &patch.origin {
            self.origin = origin.clone();
        }
        if let Some(destination) = &patch.destination {
            self.destination = destination.clone();
        }
        if let Some(departure_time) = patch.departure_time {
            self.departure_time = departure_time;
        }
        if let Some(price) = patch.price_per_seat {
            self.price_per_seat = price;
        }
        if let Some(vehicle_type) = patch.vehicle_type {
            self.vehicle_type = vehicle_type;
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(route) = &patch.route {
            self.route = Some(route.clone());
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition: Active → `to`
    pub fn close(&mut self, to: RideStatus) -> Result<(), RideError> {
        if self.status != RideStatus::Active || to == RideStatus::Active {
            return Err(RideError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Driver input for posting a ride. Every field is optional on the wire so
/// that missing values surface as validation errors rather than decode errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRide {
    pub origin: Option<Location>,
    pub destination: Option<Location>,
    pub departure_time: Option<DateTime<Utc>>,
    pub seats_available: Option<i32>,
    pub price_per_seat: Option<f64>,
    #[serde(default)]
    pub vehicle_type: Option<VehicleType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub route: Option<RouteInfo>,
}

impl NewRide {
    /// Validate the draft and build an `active` ride owned by `driver_id`
    pub fn into_ride(self, driver_id: &str) -> Result<Ride, RideError> {
        let origin = required_location(self.origin, "Origin")?;
        let destination = required_location(self.destination, "Destination")?;
        let departure_time = self
            .departure_time
            .ok_or_else(|| RideError::Validation("Valid departure time is required".to_string()))?;

        let seats_available = self.seats_available.unwrap_or(0);
        validate_seats(seats_available)?;

        let price_per_seat = self
            .price_per_seat
            .ok_or_else(|| RideError::Validation("Price per seat is required".to_string()))?;
        validate_price(price_per_seat)?;

        let now = Utc::now();
        Ok(Ride {
            id: Uuid::new_v4(),
            driver_id: driver_id.to_string(),
            origin,
            destination,
            departure_time,
            seats: SeatInventory::new(seats_available),
            price_per_seat,
            vehicle_type: self.vehicle_type.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            route: self.route,
            status: RideStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial driver edit. `bookedSeats`, `status` and `driverId` are not editable.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RidePatch {
    pub origin: Option<Location>,
    pub destination: Option<Location>,
    pub departure_time: Option<DateTime<Utc>>,
    pub seats_available: Option<i32>,
    pub price_per_seat: Option<f64>,
    pub vehicle_type: Option<VehicleType>,
    pub description: Option<String>,
    pub route: Option<RouteInfo>,
}

impl RidePatch {
    pub fn validate(&self) -> Result<(), RideError> {
        if let Some(origin) = &self.origin {
            validate_address(origin, "Origin")?;
        }
        if let Some(destination) = &self.destination {
            validate_address(destination, "Destination")?;
        }
        if let Some(seats) = self.seats_available {
            validate_seats(seats)?;
        }
        if let Some(price) = self.price_per_seat {
            validate_price(price)?;
        }
        Ok(())
    }
}

fn required_location(location: Option<Location>, label: &str) -> Result<Location, RideError> {
    let location =
        location.ok_or_else(|| RideError::Validation(format!("{} address is required", label)))?;
    validate_address(&location, label)?;
    Ok(location)
}

fn validate_address(location: &Location, label: &str) -> Result<(), RideError> {
    if location.address.trim().is_empty() {
        return Err(RideError::Validation(format!("{} address is required", label)));
    }
    Ok(())
}

fn validate_seats(seats: i32) -> Result<(), RideError> {
    if seats < 1 {
        return Err(RideError::Validation(
            "At least 1 seat must be available".to_string(),
        ));
    }
    Ok(())
}

fn validate_price(price: f64) -> Result<(), RideError> {
    if !price.is_finite() || price < 0.0 {
        return Err(RideError::Validation(
            "Price per seat must be a positive number".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RideError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid ride transition from {from} to {to}")]
    InvalidTransition {
        from: RideStatus,
        to: RideStatus,
    },

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}
