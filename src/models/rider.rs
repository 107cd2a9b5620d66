// src/models/rider.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::driver::RatingSummary;
use super::location::LocationFix;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Rider {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub city: Option<String>,
    pub current_location: Option<LocationFix>,
    pub rating: RatingSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Rider {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RiderRegistration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub city: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RiderResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub city: Option<String>,
    pub current_location: Option<LocationFix>,
    pub rating: RatingSummary,
    pub created_at: DateTime<Utc>,
}

impl From<Rider> for RiderResponse {
    fn from(rider: Rider) -> Self {
        Self {
            id: rider.id,
            first_name: rider.first_name,
            last_name: rider.last_name,
            phone_number: rider.phone_number,
            city: rider.city,
            current_location: rider.current_location,
            rating: rider.rating,
            created_at: rider.created_at,
        }
    }
}
