pub mod models;
pub mod otp;
pub mod transitions;

pub use models::{
    Booking, BookingError, BookingStatus, EmergencyContact, Luggage, NewBooking,
    PassengerDetails, PaymentStatus, PickUpLocation,
};
pub use transitions::{BookingAction, BookingCommand, Party, Transition, TRANSITIONS};
