use chrono::NaiveDate;
use serde::Deserialize;

use cityride_rides::{Ride, VehicleType};

use crate::{CoreError, CoreResult};

/// Filters for the public ride listing. Unset fields do not constrain.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideQuery {
    /// Case-insensitive substring of the origin address
    pub origin: Option<String>,
    /// Case-insensitive substring of the destination address
    pub destination: Option<String>,
    /// UTC calendar day of departure
    pub date: Option<NaiveDate>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Minimum number of free seats
    pub seats_available: Option<i32>,
    pub vehicle_type: Option<VehicleType>,
}

impl RideQuery {
    pub fn validate(&self) -> CoreResult<()> {
        for price in [self.min_price, self.max_price].into_iter().flatten() {
            if !price.is_finite() || price < 0.0 {
                return Err(CoreError::Validation(
                    "Price filters must be non-negative numbers".to_string(),
                ));
            }
        }
        if let Some(seats) = self.seats_available {
            if seats < 1 {
                return Err(CoreError::Validation(
                    "Seat filter must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether `ride` is an active ride satisfying every set filter
    pub fn matches(&self, ride: &Ride) -> bool {
        if !ride.is_active() {
            return false;
        }
        if let Some(origin) = non_blank(&self.origin) {
            if !contains_ignore_case(&ride.origin.address, origin) {
                return false;
            }
        }
        if let Some(destination) = non_blank(&self.destination) {
            if !contains_ignore_case(&ride.destination.address, destination) {
                return false;
            }
        }
        if let Some(date) = self.date {
            if ride.departure_time.date_naive() != date {
                return false;
            }
        }
        if let Some(min) = self.min_price {
            if ride.price_per_seat < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if ride.price_per_seat > max {
                return false;
            }
        }
        if let Some(seats) = self.seats_available {
            if ride.available_seats() < seats {
                return false;
            }
        }
        if let Some(vehicle_type) = self.vehicle_type {
            if ride.vehicle_type != vehicle_type {
                return false;
            }
        }
        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
