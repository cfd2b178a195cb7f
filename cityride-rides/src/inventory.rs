use serde::{Deserialize, Serialize};

/// Seat capacity of a single ride.
///
/// `booked_seats` never exceeds `seats_available` and never drops below zero;
/// every mutation goes through `reserve`, `release` or `resize`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatInventory {
    pub seats_available: i32,
    pub booked_seats: i32,
}

impl SeatInventory {
    pub fn new(seats_available: i32) -> Self {
        Self {
            seats_available,
            booked_seats: 0,
        }
    }

    /// Seats that can still be booked
    pub fn free(&self) -> i32 {
        (self.seats_available - self.booked_seats).max(0)
    }

    /// Hold `count` seats for a booking
    pub fn reserve(&mut self, count: i32) -> Result<(), InventoryError> {
        if count < 1 {
            return Err(InventoryError::InvalidCount(count));
        }

        if count > self.free() {
            return Err(InventoryError::InsufficientSeats {
                requested: count,
                available: self.free(),
            });
        }

        self.booked_seats += count;
        Ok(())
    }

    /// Give seats back, clamped at zero. Returns how many were actually released.
    pub fn release(&mut self, count: i32) -> i32 {
        let released = count.clamp(0, self.booked_seats);
        self.booked_seats -= released;
        released
    }

    /// Change the total capacity offered by the driver
    pub fn resize(&mut self, seats_available: i32) -> Result<(), InventoryError> {
        if seats_available < 1 {
            return Err(InventoryError::InvalidCount(seats_available));
        }

        if seats_available < self.booked_seats {
            return Err(InventoryError::BelowBooked {
                requested: seats_available,
                booked: self.booked_seats,
            });
        }

        self.seats_available = seats_available;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Seat count must be at least 1, got {0}")]
    InvalidCount(i32),

    #[error("Only {available} seat(s) available")]
    InsufficientSeats {
        requested: i32,
        available: i32,
    },

    #[error("Cannot reduce seats to {requested}: {booked} seat(s) already booked")]
    BelowBooked {
        requested: i32,
        booked: i32,
    },
}
