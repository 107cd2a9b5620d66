// src/models/active_ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::location::{GeoPoint, LocationSource};
use super::ride_request::{Party, RideRequest, RideStatus, TrackingStatus};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveRideStatus {
    DriverEnRoute,
    ArrivedAtPickup,
    PassengerPickedUp,
    EnRouteToDestination,
    Completed,
    Cancelled,
}

impl ActiveRideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveRideStatus::DriverEnRoute => "driver_en_route",
            ActiveRideStatus::ArrivedAtPickup => "arrived_at_pickup",
            ActiveRideStatus::PassengerPickedUp => "passenger_picked_up",
            ActiveRideStatus::EnRouteToDestination => "en_route_to_destination",
            ActiveRideStatus::Completed => "completed",
            ActiveRideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ActiveRideStatus::Completed | ActiveRideStatus::Cancelled)
    }

    /// Request status a driver-reported tracking status belongs to.
    /// `None` for the closing statuses, which only the lifecycle may set.
    pub fn required_request_status(&self) -> Option<RideStatus> {
        match self {
            ActiveRideStatus::DriverEnRoute | ActiveRideStatus::ArrivedAtPickup => Some(RideStatus::Accepted),
            ActiveRideStatus::PassengerPickedUp | ActiveRideStatus::EnRouteToDestination => {
                Some(RideStatus::InProgress)
            }
            ActiveRideStatus::Completed | ActiveRideStatus::Cancelled => None,
        }
    }

    /// Mirror of this status on the request's tracking block.
    pub fn tracking_status(&self) -> Option<TrackingStatus> {
        match self {
            ActiveRideStatus::DriverEnRoute => Some(TrackingStatus::DriverEnRoute),
            ActiveRideStatus::ArrivedAtPickup => Some(TrackingStatus::DriverArrived),
            ActiveRideStatus::PassengerPickedUp => Some(TrackingStatus::PassengerPickedUp),
            ActiveRideStatus::EnRouteToDestination => Some(TrackingStatus::EnRouteToDestination),
            ActiveRideStatus::Completed | ActiveRideStatus::Cancelled => None,
        }
    }
}

impl std::fmt::Display for ActiveRideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverLocationMeta {
    pub last_updated: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub source: LocationSource,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Waypoint {
    pub point: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Route {
    pub waypoints: Vec<Waypoint>,
    pub total_distance_km: f64,
    pub estimated_duration_min: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Timing {
    pub ride_started: DateTime<Utc>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub dropoff_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RideMetrics {
    pub current_distance_km: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Emergency {
    pub is_active: bool,
    pub raised_by: Option<Party>,
    pub activated_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Live tracking record for an accepted ride, keyed by its ride request id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActiveRide {
    pub id: String,
    pub ride_request_id: String,
    pub rider_id: String,
    pub driver_id: String,
    pub current_status: ActiveRideStatus,

    pub driver_location: Option<GeoPoint>,
    pub driver_location_meta: Option<DriverLocationMeta>,

    pub route: Route,
    pub timing: Timing,
    pub metrics: RideMetrics,
    pub emergency: Emergency,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl ActiveRide {
    pub fn open(id: String, request: &RideRequest, driver_location: Option<GeoPoint>, now: DateTime<Utc>) -> Self {
        let waypoints = driver_location
            .map(|point| vec![Waypoint { point, timestamp: now }])
            .unwrap_or_default();

        Self {
            id,
            ride_request_id: request.id.clone(),
            rider_id: request.rider_id.clone(),
            driver_id: request.driver_id.clone(),
            current_status: ActiveRideStatus::DriverEnRoute,
            driver_location,
            driver_location_meta: driver_location.map(|_| DriverLocationMeta {
                last_updated: now,
                accuracy: None,
                source: LocationSource::Gps,
            }),
            route: Route {
                waypoints,
                total_distance_km: 0.0,
                estimated_duration_min: request.estimated_duration_min,
            },
            timing: Timing {
                ride_started: now,
                pickup_time: None,
                dropoff_time: None,
                completed_time: None,
            },
            metrics: RideMetrics::default(),
            emergency: Emergency::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.current_status.is_closed()
    }

    pub fn last_fix_at(&self) -> Option<DateTime<Utc>> {
        self.driver_location_meta.as_ref().map(|meta| meta.last_updated)
    }

    /// Appends a driver position to the route. Returns `false` and leaves the
    /// record untouched when the fix is older than the latest one recorded.
    pub fn record_ping(
        &mut self,
        point: GeoPoint,
        recorded_at: DateTime<Utc>,
        accuracy: Option<f64>,
        source: LocationSource,
    ) -> bool {
        if self.last_fix_at().is_some_and(|last| recorded_at < last) {
            return false;
        }

        if let Some(previous) = self.route.waypoints.last() {
            let segment_km = previous.point.distance_km(&point);
            self.route.total_distance_km += segment_km;

            let elapsed_secs = (recorded_at - previous.timestamp).num_milliseconds() as f64 / 1000.0;
            if elapsed_secs >= 1.0 {
                let speed = segment_km / (elapsed_secs / 3600.0);
                self.metrics.max_speed_kmh = self.metrics.max_speed_kmh.max(speed);
            }
        }

        let since_start_secs = (recorded_at - self.timing.ride_started).num_milliseconds() as f64 / 1000.0;
        if since_start_secs >= 1.0 {
            self.metrics.average_speed_kmh = self.route.total_distance_km / (since_start_secs / 3600.0);
        }
        self.metrics.current_distance_km = self.route.total_distance_km;

        self.route.waypoints.push(Waypoint {
            point,
            timestamp: recorded_at,
        });
        self.driver_location = Some(point);
        self.driver_location_meta = Some(DriverLocationMeta {
            last_updated: recorded_at,
            accuracy,
            source,
        });
        self.updated_at = Utc::now().max(recorded_at);
        true
    }

    pub fn set_status(&mut self, status: ActiveRideStatus, now: DateTime<Utc>) {
        match status {
            ActiveRideStatus::PassengerPickedUp => {
                self.timing.pickup_time.get_or_insert(now);
            }
            ActiveRideStatus::Completed => {
                self.timing.dropoff_time.get_or_insert(now);
                self.timing.completed_time = Some(now);
            }
            ActiveRideStatus::Cancelled => {
                self.timing.completed_time = Some(now);
            }
            _ => {}
        }
        self.current_status = status;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::location::Place;
    use crate::models::ride_request::{Ratings, Tracking};
    use chrono::Duration;

    fn request() -> RideRequest {
        let now = Utc::now();
        let place = |lng, lat| Place {
            location: GeoPoint::new(lng, lat).unwrap(),
            address: "somewhere".into(),
        };
        RideRequest {
            id: "req-1".into(),
            rider_id: "rdr-1".into(),
            driver_id: "drv-1".into(),
            pickup: place(77.10, 28.70),
            destination: place(77.20, 28.60),
            estimated_distance_km: 14.9,
            estimated_duration_min: 30,
            status: RideStatus::Accepted,
            request_time: now,
            response_time: Some(now),
            pickup_time: None,
            completion_time: None,
            cancelled_at: None,
            estimated_fare: None,
            actual_fare: None,
            actual_distance_km: None,
            rider_notes: None,
            driver_notes: None,
            cancellation_reason: None,
            tracking: Tracking::default(),
            ratings: Ratings::default(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn test_open_seeds_route_from_driver_location() {
        let start = GeoPoint::new(77.10, 28.70).unwrap();
        let ride = ActiveRide::open("act-1".into(), &request(), Some(start), Utc::now());
        assert_eq!(ride.current_status, ActiveRideStatus::DriverEnRoute);
        assert_eq!(ride.route.waypoints.len(), 1);
        assert_eq!(ride.route.estimated_duration_min, 30);

        let blind = ActiveRide::open("act-2".into(), &request(), None, Utc::now());
        assert!(blind.route.waypoints.is_empty());
        assert!(blind.driver_location_meta.is_none());
    }

    #[test]
    fn test_pings_accumulate_distance_and_speed() {
        let t0 = Utc::now();
        let mut ride = ActiveRide::open("act-1".into(), &request(), Some(GeoPoint::new(0.0, 0.0).unwrap()), t0);

        // One degree of latitude in one hour is roughly 111 km/h.
        assert!(ride.record_ping(GeoPoint::new(0.0, 1.0).unwrap(), t0 + Duration::hours(1), Some(5.0), LocationSource::Gps));
        assert!((ride.route.total_distance_km - 111.19).abs() < 0.5);
        assert!((ride.metrics.max_speed_kmh - 111.19).abs() < 0.5);
        assert!((ride.metrics.average_speed_kmh - 111.19).abs() < 0.5);
        assert_eq!(ride.route.waypoints.len(), 2);
        assert_eq!(ride.metrics.current_distance_km, ride.route.total_distance_km);
    }

    #[test]
    fn test_stale_ping_is_ignored() {
        let t0 = Utc::now();
        let mut ride = ActiveRide::open("act-1".into(), &request(), Some(GeoPoint::new(0.0, 0.0).unwrap()), t0);
        assert!(ride.record_ping(GeoPoint::new(0.0, 0.01).unwrap(), t0 + Duration::seconds(60), None, LocationSource::Gps));

        let before = ride.route.total_distance_km;
        let accepted = ride.record_ping(
            GeoPoint::new(0.0, 0.5).unwrap(),
            t0 + Duration::seconds(30),
            None,
            LocationSource::Network,
        );
        assert!(!accepted);
        assert_eq!(ride.route.total_distance_km, before);
        assert_eq!(ride.route.waypoints.len(), 2);
    }

    #[test]
    fn test_closing_statuses_stamp_timing() {
        let now = Utc::now();
        let mut ride = ActiveRide::open("act-1".into(), &request(), None, now);
        ride.set_status(ActiveRideStatus::PassengerPickedUp, now);
        ride.set_status(ActiveRideStatus::Completed, now);
        assert!(ride.is_closed());
        assert_eq!(ride.timing.pickup_time, Some(now));
        assert_eq!(ride.timing.completed_time, Some(now));
        assert!(ride.timing.dropoff_time.is_some());
    }

    #[test]
    fn test_tracking_requirements() {
        assert_eq!(ActiveRideStatus::ArrivedAtPickup.required_request_status(), Some(RideStatus::Accepted));
        assert_eq!(
            ActiveRideStatus::EnRouteToDestination.required_request_status(),
            Some(RideStatus::InProgress)
        );
        assert_eq!(ActiveRideStatus::Completed.required_request_status(), None);
        assert_eq!(
            ActiveRideStatus::ArrivedAtPickup.tracking_status(),
            Some(TrackingStatus::DriverArrived)
        );
    }
}
