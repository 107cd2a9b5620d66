// src/models/mod.rs
pub mod active_ride;
pub mod driver;
pub mod events;
pub mod location;
pub mod ride_request;
pub mod rider;

pub use active_ride::*;
pub use driver::*;
pub use events::*;
pub use location::*;
pub use ride_request::*;
pub use rider::*;
