// src/models/events.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::active_ride::ActiveRideStatus;
use super::location::{GeoPoint, Place};
use super::ride_request::Party;

/// Pushed to websocket subscribers as `{"event": "<name>", "ride_id": ..., ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RideEvent {
    NewRideRequest {
        ride_id: String,
        rider_id: String,
        driver_id: String,
        pickup: Place,
        destination: Place,
        estimated_fare: Option<f64>,
        estimated_distance_km: f64,
    },
    RideAccepted {
        ride_id: String,
        driver_id: String,
        driver_location: Option<GeoPoint>,
        estimated_arrival_min: Option<u32>,
    },
    RideRejected {
        ride_id: String,
        driver_id: String,
        reason: Option<String>,
    },
    RideCancelled {
        ride_id: String,
        cancelled_by: Party,
        reason: Option<String>,
    },
    RideStarted {
        ride_id: String,
        pickup_time: DateTime<Utc>,
    },
    RideCompleted {
        ride_id: String,
        actual_fare: Option<f64>,
        actual_distance_km: Option<f64>,
    },
    LocationUpdated {
        ride_id: String,
        driver_id: String,
        location: GeoPoint,
        recorded_at: DateTime<Utc>,
        total_distance_km: f64,
    },
    TrackingStatusChanged {
        ride_id: String,
        status: ActiveRideStatus,
    },
    EmergencyRaised {
        ride_id: String,
        raised_by: Party,
        notes: Option<String>,
    },
    EmergencyResolved {
        ride_id: String,
        notes: Option<String>,
    },
}

impl RideEvent {
    pub fn ride_id(&self) -> &str {
        match self {
            RideEvent::NewRideRequest { ride_id, .. }
            | RideEvent::RideAccepted { ride_id, .. }
            | RideEvent::RideRejected { ride_id, .. }
            | RideEvent::RideCancelled { ride_id, .. }
            | RideEvent::RideStarted { ride_id, .. }
            | RideEvent::RideCompleted { ride_id, .. }
            | RideEvent::LocationUpdated { ride_id, .. }
            | RideEvent::TrackingStatusChanged { ride_id, .. }
            | RideEvent::EmergencyRaised { ride_id, .. }
            | RideEvent::EmergencyResolved { ride_id, .. } => ride_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RideEvent::NewRideRequest { .. } => "new_ride_request",
            RideEvent::RideAccepted { .. } => "ride_accepted",
            RideEvent::RideRejected { .. } => "ride_rejected",
            RideEvent::RideCancelled { .. } => "ride_cancelled",
            RideEvent::RideStarted { .. } => "ride_started",
            RideEvent::RideCompleted { .. } => "ride_completed",
            RideEvent::LocationUpdated { .. } => "location_updated",
            RideEvent::TrackingStatusChanged { .. } => "tracking_status_changed",
            RideEvent::EmergencyRaised { .. } => "emergency_raised",
            RideEvent::EmergencyResolved { .. } => "emergency_resolved",
        }
    }

    /// The last event a ride topic carries.
    pub fn closes_ride(&self) -> bool {
        matches!(
            self,
            RideEvent::RideRejected { .. } | RideEvent::RideCancelled { .. } | RideEvent::RideCompleted { .. }
        )
    }

    /// Events the addressed driver also needs before they have joined the ride topic.
    pub fn concerns_driver(&self) -> bool {
        matches!(
            self,
            RideEvent::NewRideRequest { .. } | RideEvent::RideCancelled { .. }
        )
    }
}
