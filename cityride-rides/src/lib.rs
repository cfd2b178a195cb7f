pub mod inventory;
pub mod ride;

pub use inventory::{InventoryError, SeatInventory};
pub use ride::{
    Coordinates, Location, NewRide, Ride, RideError, RidePatch, RideStatus, RouteInfo,
    VehicleType,
};
