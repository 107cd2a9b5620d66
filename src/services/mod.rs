// src/services/mod.rs
pub mod broadcast_service;
pub mod driver_service;
pub mod messaging_service;
pub mod ride_service;
pub mod rider_service;
pub mod store_service;
