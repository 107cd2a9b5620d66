// src/models/ride_request.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::active_ride::ActiveRideStatus;
use super::location::{LocationFix, LocationSource, Place, PlaceInput, PointInput};
use crate::errors::{PoolmateError, PoolmateResult};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,    // Waiting on the addressed driver
    Accepted,   // Driver on the way to pickup
    Rejected,   // Driver declined
    Cancelled,  // Rider cancelled, or driver aborted mid-ride
    InProgress, // Rider on board
    Completed,
}

impl RideStatus {
    pub const ALL: [RideStatus; 6] = [
        RideStatus::Pending,
        RideStatus::Accepted,
        RideStatus::Rejected,
        RideStatus::Cancelled,
        RideStatus::InProgress,
        RideStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Rejected => "rejected",
            RideStatus::Cancelled => "cancelled",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Rejected | RideStatus::Cancelled | RideStatus::Completed
        )
    }

    /// Accepted or in progress: the window in which an ActiveRide is live.
    pub fn is_live(&self) -> bool {
        matches!(self, RideStatus::Accepted | RideStatus::InProgress)
    }

    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, InProgress)
                | (Accepted, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = PoolmateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RideStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| PoolmateError::validation_error("status", format!("unknown status '{s}'")))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Rider,
    Driver,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Rider => f.write_str("rider"),
            Party::Driver => f.write_str("driver"),
        }
    }
}

/// Everything that can move a request through the status graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideAction {
    Accept,
    Reject,
    Cancel,
    Abort,
    Start,
    Complete,
}

impl RideAction {
    pub fn target(&self) -> RideStatus {
        match self {
            RideAction::Accept => RideStatus::Accepted,
            RideAction::Reject => RideStatus::Rejected,
            RideAction::Cancel | RideAction::Abort => RideStatus::Cancelled,
            RideAction::Start => RideStatus::InProgress,
            RideAction::Complete => RideStatus::Completed,
        }
    }

    pub fn allowed_from(&self) -> &'static [RideStatus] {
        match self {
            RideAction::Accept | RideAction::Reject => &[RideStatus::Pending],
            RideAction::Cancel => &[RideStatus::Pending, RideStatus::Accepted],
            RideAction::Abort => &[RideStatus::InProgress],
            RideAction::Start => &[RideStatus::Accepted],
            RideAction::Complete => &[RideStatus::InProgress],
        }
    }

    pub fn party(&self) -> Party {
        match self {
            RideAction::Cancel => Party::Rider,
            _ => Party::Driver,
        }
    }
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideAction::Accept => "accept",
            RideAction::Reject => "reject",
            RideAction::Cancel => "cancel",
            RideAction::Abort => "abort",
            RideAction::Start => "start",
            RideAction::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Outcome of checking an action against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    /// The action already happened; answer with the current state and do nothing else.
    Replay,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    #[default]
    DriverEnRoute,
    DriverArrived,
    PassengerPickedUp,
    EnRouteToDestination,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Tracking {
    pub driver_location: Option<LocationFix>,
    pub status: TrackingStatus,
    pub estimated_arrival_min: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RatingEntry {
    pub rating: u8,
    pub feedback: Option<String>,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Ratings {
    pub by_rider: Option<RatingEntry>,
    pub by_driver: Option<RatingEntry>,
}

impl Ratings {
    pub fn slot(&mut self, rater: Party) -> &mut Option<RatingEntry> {
        match rater {
            Party::Rider => &mut self.by_rider,
            Party::Driver => &mut self.by_driver,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideRequest {
    pub id: String,
    pub rider_id: String,
    pub driver_id: String,

    pub pickup: Place,
    pub destination: Place,
    pub estimated_distance_km: f64,
    pub estimated_duration_min: u32,

    pub status: RideStatus,
    pub request_time: DateTime<Utc>,
    pub response_time: Option<DateTime<Utc>>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub estimated_fare: Option<f64>,
    pub actual_fare: Option<f64>,
    pub actual_distance_km: Option<f64>,

    pub rider_notes: Option<String>,
    pub driver_notes: Option<String>,
    pub cancellation_reason: Option<String>,

    pub tracking: Tracking,
    pub ratings: Ratings,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl RideRequest {
    pub fn party_id(&self, party: Party) -> &str {
        match party {
            Party::Rider => &self.rider_id,
            Party::Driver => &self.driver_id,
        }
    }

    /// The (rider, driver) pair is fixed at creation; only they may act on the request.
    pub fn authorize(&self, party: Party, actor_id: &str) -> PoolmateResult<()> {
        if self.party_id(party) == actor_id {
            Ok(())
        } else {
            Err(PoolmateError::not_authorized(format!(
                "{party} {actor_id} is not assigned to ride request {}",
                self.id
            )))
        }
    }

    pub fn plan(&self, action: RideAction) -> PoolmateResult<Transition> {
        if self.status == action.target() {
            return Ok(Transition::Replay);
        }
        if action.allowed_from().contains(&self.status) && self.status.can_transition_to(action.target()) {
            Ok(Transition::Apply)
        } else {
            Err(PoolmateError::invalid_transition(&self.id, self.status, action))
        }
    }

    /// Moves the status and stamps the timestamp that belongs to the action.
    /// Callers must have checked [`RideRequest::plan`] first.
    pub fn apply(&mut self, action: RideAction, now: DateTime<Utc>) {
        // Never stamp anything earlier than creation, even with a skewed clock.
        let now = now.max(self.request_time);

        match action {
            RideAction::Accept | RideAction::Reject => self.response_time = Some(now),
            RideAction::Cancel | RideAction::Abort => self.cancelled_at = Some(now),
            RideAction::Start => {
                self.pickup_time = Some(now);
                self.tracking.status = TrackingStatus::PassengerPickedUp;
            }
            RideAction::Complete => self.completion_time = Some(now),
        }
        self.status = action.target();
        self.updated_at = now;
    }
}

// Request payloads. Required ids are optional here so a missing one is a 400 from
// validation rather than a body-deserialization rejection.

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CreateRideRequest {
    pub rider_id: Option<String>,
    pub driver_id: Option<String>,
    pub pickup: Option<PlaceInput>,
    pub destination: Option<PlaceInput>,
    #[serde(default, alias = "notes")]
    pub rider_notes: Option<String>,
    #[serde(default)]
    pub estimated_fare: Option<f64>,
    #[serde(default)]
    pub rider_current_location: Option<PointInput>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AcceptRideRequest {
    pub driver_id: Option<String>,
    #[serde(default, alias = "driver_notes")]
    pub notes: Option<String>,
    #[serde(default, alias = "estimated_arrival")]
    pub estimated_arrival_min: Option<u32>,
    #[serde(default)]
    pub driver_location: Option<PointInput>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RejectRideRequest {
    pub driver_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CancelRideRequest {
    pub rider_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AbortRideRequest {
    pub driver_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StartRideRequest {
    pub driver_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CompleteRideRequest {
    pub driver_id: Option<String>,
    #[serde(default)]
    pub actual_fare: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateRideRequest {
    pub rater: Party,
    pub rater_id: String,
    pub rating: u8,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingStatusUpdate {
    pub driver_id: String,
    pub status: ActiveRideStatus,
    #[serde(default)]
    pub estimated_arrival_min: Option<u32>,
}

/// Driver position ping. Flat `latitude`/`longitude` or GeoJSON, as elsewhere.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LocationPing {
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(flatten)]
    pub point: PointInput,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub source: LocationSource,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmergencyRequest {
    pub actor_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResolveEmergencyRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

/// `status=all|upcoming|pending,accepted,...` as used by the rider bookings view.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestFilter {
    All,
    Statuses(Vec<RideStatus>),
}

impl RequestFilter {
    pub fn parse(raw: Option<&str>) -> PoolmateResult<Self> {
        match raw.map(str::trim) {
            None | Some("") | Some("all") => Ok(RequestFilter::All),
            Some("upcoming") => Ok(RequestFilter::Statuses(vec![
                RideStatus::Pending,
                RideStatus::Accepted,
            ])),
            Some(list) => list
                .split(',')
                .map(|s| s.trim().parse::<RideStatus>())
                .collect::<PoolmateResult<Vec<_>>>()
                .map(RequestFilter::Statuses),
        }
    }

    pub fn matches(&self, status: RideStatus) -> bool {
        match self {
            RequestFilter::All => true,
            RequestFilter::Statuses(statuses) => statuses.contains(&status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use RideStatus::*;
        let allowed = [
            (Pending, Accepted),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Accepted, InProgress),
            (Accepted, Cancelled),
            (InProgress, Completed),
            (InProgress, Cancelled),
        ];
        for from in RideStatus::ALL {
            for to in RideStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in RideStatus::ALL.into_iter().filter(RideStatus::is_terminal) {
            assert!(RideStatus::ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_nothing_reenters_pending() {
        assert!(RideStatus::ALL.iter().all(|s| !s.can_transition_to(RideStatus::Pending)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("in_progress".parse::<RideStatus>().unwrap(), RideStatus::InProgress);
        assert!("archived".parse::<RideStatus>().is_err());
        assert_eq!(
            serde_json::to_value(RideStatus::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
    }

    #[test]
    fn test_request_filter() {
        assert_eq!(RequestFilter::parse(None).unwrap(), RequestFilter::All);
        let upcoming = RequestFilter::parse(Some("upcoming")).unwrap();
        assert!(upcoming.matches(RideStatus::Pending));
        assert!(!upcoming.matches(RideStatus::Completed));

        let list = RequestFilter::parse(Some("completed, cancelled")).unwrap();
        assert!(list.matches(RideStatus::Cancelled));
        assert!(!list.matches(RideStatus::Pending));

        assert!(RequestFilter::parse(Some("completed,bogus")).is_err());
    }

    #[test]
    fn test_cancel_is_rider_action_everything_else_driver() {
        assert_eq!(RideAction::Cancel.party(), Party::Rider);
        assert_eq!(RideAction::Abort.party(), Party::Driver);
        assert_eq!(RideAction::Accept.party(), Party::Driver);
    }
}
