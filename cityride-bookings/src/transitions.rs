//! The booking state machine.
//!
//! Every status change a booking can undergo after creation is a row of
//! [`TRANSITIONS`]. [`Booking::apply`] resolves a command against the table.
//! The only other writer of `Booking::status` is the bulk cancellation of
//! confirmed bookings when their ride is canceled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Booking, BookingError, BookingStatus, PaymentStatus};
use crate::otp;

/// The caller's relation to a booking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    /// Driver of the booked ride
    Driver,
    /// Passenger who owns the booking
    Passenger,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Accept,
    Verify,
    BeginPayment,
    Finalize,
    Cancel,
}

impl BookingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingAction::Accept => "accept",
            BookingAction::Verify => "verify",
            BookingAction::BeginPayment => "complete",
            BookingAction::Finalize => "finalize",
            BookingAction::Cancel => "cancel",
        }
    }

    /// Parties allowed to perform this action, whatever the current status
    pub fn permitted_parties(&self) -> &'static [Party] {
        TRANSITIONS
            .iter()
            .find(|t| t.action == *self)
            .map(|t| t.parties)
            .unwrap_or(&[])
    }

    fn guard_message(&self, from: BookingStatus) -> String {
        match self {
            BookingAction::Accept => "Booking must be in registered status to accept".to_string(),
            BookingAction::Verify => "Booking must be accepted before verification".to_string(),
            BookingAction::BeginPayment => "Booking must be confirmed to complete".to_string(),
            BookingAction::Finalize => {
                "Booking must be in payment_processing status to finalize".to_string()
            }
            BookingAction::Cancel => format!("Cannot cancel a booking that is already {}", from),
        }
    }
}

impl fmt::Display for BookingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the transition table
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub action: BookingAction,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub parties: &'static [Party],
}

const DRIVER: &[Party] = &[Party::Driver];
const PASSENGER: &[Party] = &[Party::Passenger];
const EITHER: &[Party] = &[Party::Driver, Party::Passenger];

pub const TRANSITIONS: &[Transition] = &[
    Transition {
        action: BookingAction::Accept,
        from: BookingStatus::Registered,
        to: BookingStatus::Accepted,
        parties: DRIVER,
    },
    Transition {
        action: BookingAction::Verify,
        from: BookingStatus::Accepted,
        to: BookingStatus::Confirmed,
        parties: DRIVER,
    },
    Transition {
        action: BookingAction::BeginPayment,
        from: BookingStatus::Confirmed,
        to: BookingStatus::PaymentProcessing,
        parties: PASSENGER,
    },
    Transition {
        action: BookingAction::Finalize,
        from: BookingStatus::PaymentProcessing,
        to: BookingStatus::Completed,
        parties: DRIVER,
    },
    Transition {
        action: BookingAction::Cancel,
        from: BookingStatus::Registered,
        to: BookingStatus::Canceled,
        parties: EITHER,
    },
    Transition {
        action: BookingAction::Cancel,
        from: BookingStatus::Accepted,
        to: BookingStatus::Canceled,
        parties: EITHER,
    },
    Transition {
        action: BookingAction::Cancel,
        from: BookingStatus::Confirmed,
        to: BookingStatus::Canceled,
        parties: EITHER,
    },
    Transition {
        action: BookingAction::Cancel,
        from: BookingStatus::PaymentProcessing,
        to: BookingStatus::Canceled,
        parties: EITHER,
    },
];

pub fn lookup(action: BookingAction, from: BookingStatus) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.action == action && t.from == from)
}

/// A requested change, with the input each action needs
#[derive(Debug, Clone, PartialEq)]
pub enum BookingCommand {
    Accept,
    Verify { code: String },
    BeginPayment { payment_method: Option<String> },
    Finalize,
    Cancel,
}

impl BookingCommand {
    pub fn action(&self) -> BookingAction {
        match self {
            BookingCommand::Accept => BookingAction::Accept,
            BookingCommand::Verify { .. } => BookingAction::Verify,
            BookingCommand::BeginPayment { .. } => BookingAction::BeginPayment,
            BookingCommand::Finalize => BookingAction::Finalize,
            BookingCommand::Cancel => BookingAction::Cancel,
        }
    }
}

impl Booking {
    /// Resolve `command` against the transition table and return the booking
    /// as it should be persisted. `self` is left untouched.
    ///
    /// Checks run in a fixed order: party (`NotPermitted`), input shape
    /// (`Validation`), current status (`InvalidTransition`), then the
    /// verification code itself (`CodeMismatch`). A blank or malformed code is
    /// therefore a validation error whatever state the booking is in; only a
    /// well-formed code can reach the status guard or the comparison.
    pub fn apply(
        &self,
        command: &BookingCommand,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let action = command.action();

        if !action.permitted_parties().contains(&party) {
            return Err(BookingError::NotPermitted { action, party });
        }

        if let BookingCommand::Verify { code } = command {
            if code.trim().is_empty() {
                return Err(BookingError::Validation(
                    "Verification code is required".to_string(),
                ));
            }
            if !otp::is_well_formed(code) {
                return Err(BookingError::Validation(
                    "Verification code must be 6 digits".to_string(),
                ));
            }
        }

        let transition = lookup(action, self.status).ok_or_else(|| {
            BookingError::InvalidTransition {
                action,
                from: self.status,
                message: action.guard_message(self.status),
            }
        })?;

        let mut next = self.clone();
        match command {
            BookingCommand::Verify { code } => {
                if code != self.verification_code.expose() {
                    return Err(BookingError::CodeMismatch);
                }
                next.is_verified = true;
                next.verified_at = Some(now);
                // Asserted at pickup, before any money has moved.
                next.payment_status = PaymentStatus::Paid;
            }
            BookingCommand::BeginPayment { payment_method } => {
                if let Some(method) = payment_method
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                {
                    next.payment_method = method.to_string();
                }
            }
            BookingCommand::Finalize => {
                next.payment_status = PaymentStatus::Paid;
                next.completed_at = Some(now);
            }
            BookingCommand::Accept | BookingCommand::Cancel => {}
        }

        next.status = transition.to;
        next.updated_at = now;
        Ok(next)
    }
}
