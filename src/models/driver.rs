// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::location::{GeoPoint, LocationFix, PointInput};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Vehicle {
    pub id: String,
    pub make: String,
    pub model: String,
    pub color: String,
    pub license_plate: String,
    pub capacity: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Availability {
    pub is_available: bool,
    pub last_updated: DateTime<Utc>,
    pub max_passengers: u8,
    pub current_passengers: u8,
}

impl Default for Availability {
    fn default() -> Self {
        // Drivers start offline until they flip their status.
        Self {
            is_available: false,
            last_updated: Utc::now(),
            max_passengers: 4,
            current_passengers: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RatingSummary {
    pub average: f64,
    pub total_ratings: u32,
}

impl RatingSummary {
    pub fn record(&mut self, rating: u8) {
        let total = self.average * self.total_ratings as f64 + rating as f64;
        self.total_ratings += 1;
        self.average = total / self.total_ratings as f64;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Driver {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub city: Option<String>,
    pub availability: Availability,
    pub current_location: Option<LocationFix>,
    pub rating: RatingSummary,
    pub vehicle: Option<Vehicle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Driver {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn distance_to(&self, point: &GeoPoint) -> Option<f64> {
        self.current_location
            .as_ref()
            .map(|fix| fix.point.distance_km(point))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VehicleDetails {
    pub make: String,
    pub model: String,
    pub color: String,
    pub license_plate: String,
    pub capacity: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverRegistration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub city: Option<String>,
    pub vehicle: Option<VehicleDetails>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriverStatusUpdate {
    pub is_available: bool,
    #[serde(default)]
    pub location: Option<PointInput>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub city: Option<String>,
    pub availability: Availability,
    pub current_location: Option<LocationFix>,
    pub rating: RatingSummary,
    pub vehicle: Option<Vehicle>,
}

impl From<Driver> for DriverResponse {
    fn from(driver: Driver) -> Self {
        Self {
            id: driver.id,
            first_name: driver.first_name,
            last_name: driver.last_name,
            phone_number: driver.phone_number,
            city: driver.city,
            availability: driver.availability,
            current_location: driver.current_location,
            rating: driver.rating,
            vehicle: driver.vehicle,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NearbyDriver {
    pub driver: DriverResponse,
    pub distance_km: f64,
}
