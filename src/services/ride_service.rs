// src/services/ride_service.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing;

use crate::{
    errors::PoolmateError as AppError,
    models::active_ride::{ActiveRide, ActiveRideStatus},
    models::driver::Driver,
    models::events::RideEvent,
    models::location::{GeoPoint, LocationFix, Place},
    models::ride_request::{
        AbortRideRequest, AcceptRideRequest, CancelRideRequest, CompleteRideRequest, CreateRideRequest,
        EmergencyRequest, LocationPing, Party, RateRideRequest, RatingEntry, RejectRideRequest,
        RequestFilter, ResolveEmergencyRequest, RideAction, RideRequest, RideStatus, StartRideRequest,
        Tracking, TrackingStatus, TrackingStatusUpdate, Transition,
    },
    models::rider::Rider,
    services::broadcast_service::EventHub,
    services::driver_service::DriverOperations,
    services::messaging_service::{NotificationMessage, Notifier, Recipient, TemplateKey},
    services::rider_service::RiderOperations,
    services::store_service::{Change, Indexes, Repository, Store, StoreKeys, Updated},
    utils::geo::travel_minutes,
    utils::id_generator::{IdGenerator, IdType, WithGeneratedId},
    utils::validation::{Validator, clean_text, required_id},
};

/// How far ahead of the server clock a device timestamp may run before it is clamped.
const MAX_CLOCK_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct RideConfig {
    pub average_speed_kmh: f64,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self { average_speed_kmh: 30.0 }
    }
}

/// Result of a lifecycle operation. `applied` is false for idempotent replays,
/// `notified` reports whether the best-effort notification went out.
#[derive(Debug, Clone, Serialize)]
pub struct RideOutcome {
    pub request: RideRequest,
    pub active_ride: Option<ActiveRide>,
    pub applied: bool,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationOutcome {
    pub accepted: bool,
    pub stale: bool,
    pub recorded_at: DateTime<Utc>,
    pub total_distance_km: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RideLocations {
    pub ride_id: String,
    pub status: RideStatus,
    pub driver_location: Option<LocationFix>,
    pub rider_location: LocationFix,
    /// `rider` when the rider shared a position, `pickup` when falling back to the pickup point.
    pub rider_location_source: &'static str,
    pub pickup: Place,
    pub destination: Place,
}

impl RideLocations {
    /// Positions known from the ride records alone, without asking the directory.
    pub fn from_records(request: &RideRequest, active: Option<&ActiveRide>) -> Self {
        let from_ride = active.and_then(|ride| {
            let point = ride.driver_location?;
            let last_updated = ride.driver_location_meta.as_ref().map(|m| m.last_updated).unwrap_or(ride.updated_at);
            Some(LocationFix { point, last_updated })
        });

        Self {
            ride_id: request.id.clone(),
            status: request.status,
            driver_location: from_ride.or_else(|| request.tracking.driver_location.clone()),
            rider_location: LocationFix {
                point: request.pickup.location,
                last_updated: request.request_time,
            },
            rider_location_source: "pickup",
            pickup: request.pickup.clone(),
            destination: request.destination.clone(),
        }
    }
}

#[async_trait]
pub trait RideOperations: Send + Sync {
    async fn create_request(&self, input: CreateRideRequest) -> Result<RideOutcome, AppError>;
    async fn accept_request(&self, ride_id: &str, input: AcceptRideRequest) -> Result<RideOutcome, AppError>;
    async fn reject_request(&self, ride_id: &str, input: RejectRideRequest) -> Result<RideOutcome, AppError>;
    async fn cancel_request(&self, ride_id: &str, input: CancelRideRequest) -> Result<RideOutcome, AppError>;
    async fn abort_ride(&self, ride_id: &str, input: AbortRideRequest) -> Result<RideOutcome, AppError>;
    async fn start_ride(&self, ride_id: &str, input: StartRideRequest) -> Result<RideOutcome, AppError>;
    async fn complete_ride(&self, ride_id: &str, input: CompleteRideRequest) -> Result<RideOutcome, AppError>;

    async fn update_driver_location(&self, ride_id: &str, ping: LocationPing) -> Result<LocationOutcome, AppError>;
    async fn update_tracking_status(&self, ride_id: &str, update: TrackingStatusUpdate) -> Result<ActiveRide, AppError>;
    async fn raise_emergency(&self, ride_id: &str, input: EmergencyRequest) -> Result<ActiveRide, AppError>;
    async fn resolve_emergency(&self, ride_id: &str, input: ResolveEmergencyRequest) -> Result<ActiveRide, AppError>;
    async fn rate_ride(&self, ride_id: &str, input: RateRideRequest) -> Result<RideOutcome, AppError>;

    async fn get_request(&self, ride_id: &str) -> Result<RideRequest, AppError>;
    async fn get_active_ride(&self, ride_id: &str) -> Result<ActiveRide, AppError>;
    async fn ride_locations(&self, ride_id: &str) -> Result<RideLocations, AppError>;
    async fn pending_for_driver(&self, driver_id: &str) -> Result<Vec<RideRequest>, AppError>;
    async fn requests_for_rider(&self, rider_id: &str, filter: RequestFilter) -> Result<Vec<RideRequest>, AppError>;
}

pub struct RideService {
    requests: Repository<RideRequest>,
    active_rides: Repository<ActiveRide>,
    indexes: Indexes,
    drivers: Arc<dyn DriverOperations>,
    riders: Arc<dyn RiderOperations>,
    notifier: Notifier,
    events: Arc<EventHub>,
    config: RideConfig,
}

fn driver_recipient(driver: &Driver) -> Recipient {
    Recipient {
        id: driver.id.clone(),
        name: driver.full_name(),
        email: driver.email.clone(),
    }
}

fn rider_recipient(rider: &Rider) -> Recipient {
    Recipient {
        id: rider.id.clone(),
        name: rider.full_name(),
        email: rider.email.clone(),
    }
}

fn ride_summary(request: &RideRequest) -> serde_json::Value {
    json!({
        "ride_id": request.id,
        "status": request.status,
        "pickup": request.pickup.address,
        "destination": request.destination.address,
        "estimated_fare": request.estimated_fare,
        "estimated_distance_km": request.estimated_distance_km,
    })
}

impl RideService {
    pub fn new(
        store: Arc<Store>,
        drivers: Arc<dyn DriverOperations>,
        riders: Arc<dyn RiderOperations>,
        notifier: Notifier,
        events: Arc<EventHub>,
        config: RideConfig,
    ) -> Self {
        Self {
            requests: Repository::new(Arc::clone(&store)),
            active_rides: Repository::new(Arc::clone(&store)),
            indexes: Indexes::new(store),
            drivers,
            riders,
            notifier,
            events,
            config,
        }
    }

    /// Runs one status transition as a guarded swap. Checks, in order: the request
    /// exists, the actor is the bound party, the action was already applied
    /// (replay, nothing written), the move is in the graph.
    async fn transition<F>(
        &self,
        ride_id: &str,
        action: RideAction,
        actor_id: &str,
        mut stamp: F,
    ) -> Result<Updated<RideRequest>, AppError>
    where
        F: FnMut(&mut RideRequest) + Send,
    {
        let updated = self
            .requests
            .update(ride_id, |request| {
                request.authorize(action.party(), actor_id)?;
                match request.plan(action)? {
                    Transition::Replay => Ok(Change::Unchanged),
                    Transition::Apply => {
                        request.apply(action, Utc::now());
                        stamp(request);
                        Ok(Change::Apply)
                    }
                }
            })
            .await?;

        if updated.applied {
            tracing::info!(
                "Ride request {} -> {} ({} by {})",
                ride_id,
                updated.doc.status,
                action,
                actor_id
            );
        } else {
            tracing::debug!("Ride request {} already {}, replaying {}", ride_id, updated.doc.status, action);
        }
        Ok(updated)
    }

    async fn ensure_active_ride(
        &self,
        request: &RideRequest,
        driver_location: Option<GeoPoint>,
    ) -> Result<ActiveRide, AppError> {
        if let Some(ride) = self.active_rides.get(&request.id).await? {
            return Ok(ride);
        }

        let mut ride = ActiveRide::open(
            IdGenerator::generate(IdType::ActiveRide),
            request,
            driver_location,
            Utc::now(),
        );
        match self.active_rides.create(&mut ride).await {
            Ok(()) => {}
            // Someone else opened it first.
            Err(AppError::Conflict(_)) => return self.active_rides.require(&request.id).await,
            Err(e) => return Err(e),
        }
        self.indexes.add(&StoreKeys::active_rides(), &request.id).await?;

        tracing::info!("Active ride {} opened for request {}", ride.id, request.id);
        self.settle_opened(ride).await
    }

    /// A cancel or completion that committed while the record was being opened
    /// found nothing to close. Re-read the request and close the record here.
    async fn settle_opened(&self, ride: ActiveRide) -> Result<ActiveRide, AppError> {
        let current = self.requests.require(&ride.ride_request_id).await?;
        if !current.status.is_terminal() {
            return Ok(ride);
        }

        let status = match current.status {
            RideStatus::Completed => ActiveRideStatus::Completed,
            _ => ActiveRideStatus::Cancelled,
        };
        tracing::warn!(
            "Request {} became {} while its active ride was opening",
            current.id,
            current.status
        );
        Ok(self.close_active_ride(&current.id, status).await?.unwrap_or(ride))
    }

    /// Retires the tracking record of a request that reached a terminal state.
    async fn close_active_ride(&self, ride_id: &str, status: ActiveRideStatus) -> Result<Option<ActiveRide>, AppError> {
        let closed = self
            .active_rides
            .update(ride_id, |ride| {
                if ride.is_closed() {
                    return Ok(Change::Unchanged);
                }
                ride.set_status(status, Utc::now());
                Ok(Change::Apply)
            })
            .await;

        match closed {
            Ok(updated) => {
                self.indexes.remove(&StoreKeys::active_rides(), ride_id).await?;
                if updated.applied {
                    tracing::info!("Active ride for {} closed as {}", ride_id, status);
                }
                Ok(Some(updated.doc))
            }
            Err(AppError::ActiveRideNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn rider_contact(&self, rider_id: &str) -> Option<Recipient> {
        match self.riders.get_rider(rider_id).await {
            Ok(rider) => rider.as_ref().map(rider_recipient),
            Err(e) => {
                tracing::warn!("Rider lookup for notification failed: {}", e);
                None
            }
        }
    }

    async fn driver_contact(&self, driver_id: &str) -> Option<Recipient> {
        match self.drivers.get_driver(driver_id).await {
            Ok(driver) => driver.as_ref().map(driver_recipient),
            Err(e) => {
                tracing::warn!("Driver lookup for notification failed: {}", e);
                None
            }
        }
    }

    /// Directory writes that trail a committed transition never undo it.
    async fn stamp_driver_location(&self, driver_id: &str, point: GeoPoint) {
        if let Err(e) = self.drivers.update_location(driver_id, point).await {
            tracing::warn!("Could not stamp location for driver {}: {}", driver_id, e);
        }
    }

    async fn load_active(&self, ride_id: &str) -> Result<Option<ActiveRide>, AppError> {
        self.active_rides.get(ride_id).await
    }

    fn outcome(updated: Updated<RideRequest>, active_ride: Option<ActiveRide>, notified: bool) -> RideOutcome {
        RideOutcome {
            request: updated.doc,
            active_ride,
            applied: updated.applied,
            notified,
        }
    }
}

#[async_trait]
impl RideOperations for RideService {
    async fn create_request(&self, input: CreateRideRequest) -> Result<RideOutcome, AppError> {
        let rider_id = required_id("rider_id", input.rider_id.as_deref())?;
        let driver_id = required_id("driver_id", input.driver_id.as_deref())?;
        let pickup = input
            .pickup
            .as_ref()
            .ok_or_else(|| AppError::MissingRequiredField("pickup".to_string()))?
            .normalize("pickup")?;
        let destination = input
            .destination
            .as_ref()
            .ok_or_else(|| AppError::MissingRequiredField("destination".to_string()))?
            .normalize("destination")?;
        let rider_point = input
            .rider_current_location
            .as_ref()
            .map(|p| p.normalize())
            .transpose()?;
        Validator::new()
            .non_negative("estimated_fare", input.estimated_fare)
            .finish()?;

        let driver = self.drivers.require_driver(&driver_id).await?;
        if !driver.availability.is_available {
            tracing::warn!("Ride requested from driver {} who is offline", driver_id);
        }

        let distance_km = pickup.location.distance_km(&destination.location);
        let now = Utc::now();
        let mut request = RideRequest {
            id: String::new(),
            rider_id: rider_id.clone(),
            driver_id: driver_id.clone(),
            pickup,
            destination,
            estimated_distance_km: distance_km,
            estimated_duration_min: travel_minutes(distance_km, self.config.average_speed_kmh),
            status: RideStatus::Pending,
            request_time: now,
            response_time: None,
            pickup_time: None,
            completion_time: None,
            cancelled_at: None,
            estimated_fare: input.estimated_fare,
            actual_fare: None,
            actual_distance_km: None,
            rider_notes: clean_text(input.rider_notes),
            driver_notes: None,
            cancellation_reason: None,
            tracking: Tracking::default(),
            ratings: Default::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        request.set_generated_id(IdType::RideRequest);

        self.requests.create(&mut request).await?;
        self.indexes.add(&StoreKeys::rider_requests(&rider_id), &request.id).await?;
        self.indexes.add(&StoreKeys::driver_requests(&driver_id), &request.id).await?;
        tracing::info!(
            "Ride request {} created: rider {} -> driver {} ({:.1} km)",
            request.id,
            rider_id,
            driver_id,
            distance_km
        );

        if let Some(point) = rider_point {
            if let Err(e) = self.riders.update_location(&rider_id, point).await {
                tracing::warn!("Could not store location for rider {}: {}", rider_id, e);
            }
        }

        self.events
            .publish(
                RideEvent::NewRideRequest {
                    ride_id: request.id.clone(),
                    rider_id: rider_id.clone(),
                    driver_id: driver_id.clone(),
                    pickup: request.pickup.clone(),
                    destination: request.destination.clone(),
                    estimated_fare: request.estimated_fare,
                    estimated_distance_km: request.estimated_distance_km,
                },
                &driver_id,
            )
            .await;

        let mut data = ride_summary(&request);
        data["rider_notes"] = json!(request.rider_notes);
        let notified = self
            .notifier
            .deliver(
                Some(driver_recipient(&driver)),
                NotificationMessage::new(TemplateKey::NewRideRequest, data),
            )
            .await;

        Ok(RideOutcome {
            request,
            active_ride: None,
            applied: true,
            notified,
        })
    }

    async fn accept_request(&self, ride_id: &str, input: AcceptRideRequest) -> Result<RideOutcome, AppError> {
        let driver_id = required_id("driver_id", input.driver_id.as_deref())?;
        let supplied = input.driver_location.as_ref().map(|p| p.normalize()).transpose()?;
        let notes = clean_text(input.notes);
        let eta = input.estimated_arrival_min;

        let updated = self
            .transition(ride_id, RideAction::Accept, &driver_id, |request| {
                request.driver_notes = notes.clone();
                request.tracking.status = TrackingStatus::DriverEnRoute;
                request.tracking.estimated_arrival_min = eta;
                if let Some(point) = supplied {
                    request.tracking.driver_location = Some(LocationFix::now(point));
                }
            })
            .await?;

        let driver_location = match supplied {
            Some(point) => {
                self.stamp_driver_location(&driver_id, point).await;
                Some(point)
            }
            None => self
                .drivers
                .get_driver(&driver_id)
                .await?
                .and_then(|driver| driver.current_location.map(|fix| fix.point)),
        };

        // Also repairs a missing tracking record when the accept is replayed.
        let active_ride = self.ensure_active_ride(&updated.doc, driver_location).await?;

        let mut notified = false;
        if updated.applied {
            let request = &updated.doc;
            self.events
                .publish(
                    RideEvent::RideAccepted {
                        ride_id: request.id.clone(),
                        driver_id: driver_id.clone(),
                        driver_location,
                        estimated_arrival_min: eta,
                    },
                    &driver_id,
                )
                .await;

            let mut data = ride_summary(request);
            data["estimated_arrival_min"] = json!(eta);
            data["driver_notes"] = json!(request.driver_notes);
            notified = self
                .notifier
                .deliver(
                    self.rider_contact(&request.rider_id).await,
                    NotificationMessage::new(TemplateKey::RideAccepted, data),
                )
                .await;
        }

        Ok(Self::outcome(updated, Some(active_ride), notified))
    }

    async fn reject_request(&self, ride_id: &str, input: RejectRideRequest) -> Result<RideOutcome, AppError> {
        let driver_id = required_id("driver_id", input.driver_id.as_deref())?;
        let reason = clean_text(input.reason);

        let updated = self
            .transition(ride_id, RideAction::Reject, &driver_id, |request| {
                request.cancellation_reason = reason.clone();
            })
            .await?;

        let mut notified = false;
        if updated.applied {
            let request = &updated.doc;
            self.events
                .publish(
                    RideEvent::RideRejected {
                        ride_id: request.id.clone(),
                        driver_id: driver_id.clone(),
                        reason: request.cancellation_reason.clone(),
                    },
                    &driver_id,
                )
                .await;

            let mut data = ride_summary(request);
            data["reason"] = json!(request.cancellation_reason);
            notified = self
                .notifier
                .deliver(
                    self.rider_contact(&request.rider_id).await,
                    NotificationMessage::new(TemplateKey::RideRejected, data),
                )
                .await;
        }

        Ok(Self::outcome(updated, None, notified))
    }

    async fn cancel_request(&self, ride_id: &str, input: CancelRideRequest) -> Result<RideOutcome, AppError> {
        let rider_id = required_id("rider_id", input.rider_id.as_deref())?;
        let reason = clean_text(input.reason);

        let updated = self
            .transition(ride_id, RideAction::Cancel, &rider_id, |request| {
                request.cancellation_reason = reason.clone();
            })
            .await?;

        // Runs on replays too, so a half-finished earlier attempt still gets closed out.
        let active_ride = self.close_active_ride(ride_id, ActiveRideStatus::Cancelled).await?;

        let mut notified = false;
        if updated.applied {
            let request = &updated.doc;
            self.events
                .publish(
                    RideEvent::RideCancelled {
                        ride_id: request.id.clone(),
                        cancelled_by: Party::Rider,
                        reason: request.cancellation_reason.clone(),
                    },
                    &request.driver_id,
                )
                .await;

            let mut data = ride_summary(request);
            data["cancelled_by"] = json!(Party::Rider);
            data["reason"] = json!(request.cancellation_reason);
            notified = self
                .notifier
                .deliver(
                    self.driver_contact(&request.driver_id).await,
                    NotificationMessage::new(TemplateKey::RideCancelled, data),
                )
                .await;
        }

        Ok(Self::outcome(updated, active_ride, notified))
    }

    async fn abort_ride(&self, ride_id: &str, input: AbortRideRequest) -> Result<RideOutcome, AppError> {
        let driver_id = required_id("driver_id", input.driver_id.as_deref())?;
        let reason = clean_text(input.reason);

        let updated = self
            .transition(ride_id, RideAction::Abort, &driver_id, |request| {
                request.cancellation_reason = reason.clone();
            })
            .await?;

        let active_ride = self.close_active_ride(ride_id, ActiveRideStatus::Cancelled).await?;

        let mut notified = false;
        if updated.applied {
            let request = &updated.doc;
            self.events
                .publish(
                    RideEvent::RideCancelled {
                        ride_id: request.id.clone(),
                        cancelled_by: Party::Driver,
                        reason: request.cancellation_reason.clone(),
                    },
                    &driver_id,
                )
                .await;

            let mut data = ride_summary(request);
            data["cancelled_by"] = json!(Party::Driver);
            data["reason"] = json!(request.cancellation_reason);
            notified = self
                .notifier
                .deliver(
                    self.rider_contact(&request.rider_id).await,
                    NotificationMessage::new(TemplateKey::RideCancelled, data)
                        .with_subject("Your driver had to cancel the ride"),
                )
                .await;
        }

        Ok(Self::outcome(updated, active_ride, notified))
    }

    async fn start_ride(&self, ride_id: &str, input: StartRideRequest) -> Result<RideOutcome, AppError> {
        let driver_id = required_id("driver_id", input.driver_id.as_deref())?;
        let updated = self.transition(ride_id, RideAction::Start, &driver_id, |_| {}).await?;

        let mut notified = false;
        let active_ride = if updated.applied {
            let request = &updated.doc;
            let opened = self.ensure_active_ride(request, None).await?;
            let picked_up = self
                .active_rides
                .update(&opened.ride_request_id, |ride| {
                    if ride.is_closed() {
                        return Ok(Change::Unchanged);
                    }
                    ride.set_status(ActiveRideStatus::PassengerPickedUp, Utc::now());
                    Ok(Change::Apply)
                })
                .await?;

            let pickup_time = request.pickup_time.unwrap_or(request.updated_at);
            self.events
                .publish(
                    RideEvent::RideStarted {
                        ride_id: request.id.clone(),
                        pickup_time,
                    },
                    &driver_id,
                )
                .await;

            notified = self
                .notifier
                .deliver(
                    self.rider_contact(&request.rider_id).await,
                    NotificationMessage::new(TemplateKey::RideStarted, ride_summary(request)),
                )
                .await;
            Some(picked_up.doc)
        } else {
            self.load_active(ride_id).await?
        };

        Ok(Self::outcome(updated, active_ride, notified))
    }

    async fn complete_ride(&self, ride_id: &str, input: CompleteRideRequest) -> Result<RideOutcome, AppError> {
        let driver_id = required_id("driver_id", input.driver_id.as_deref())?;
        Validator::new().non_negative("actual_fare", input.actual_fare).finish()?;

        let route_km = self
            .load_active(ride_id)
            .await?
            .map(|ride| ride.route.total_distance_km);

        let updated = self
            .transition(ride_id, RideAction::Complete, &driver_id, |request| {
                request.actual_fare = input.actual_fare.or(request.estimated_fare);
                request.actual_distance_km = route_km;
            })
            .await?;

        let active_ride = self.close_active_ride(ride_id, ActiveRideStatus::Completed).await?;

        let mut notified = false;
        if updated.applied {
            let request = &updated.doc;
            self.events
                .publish(
                    RideEvent::RideCompleted {
                        ride_id: request.id.clone(),
                        actual_fare: request.actual_fare,
                        actual_distance_km: request.actual_distance_km,
                    },
                    &driver_id,
                )
                .await;

            let mut data = ride_summary(request);
            data["actual_fare"] = json!(request.actual_fare);
            data["actual_distance_km"] = json!(request.actual_distance_km);
            notified = self
                .notifier
                .deliver(
                    self.rider_contact(&request.rider_id).await,
                    NotificationMessage::new(TemplateKey::RideCompleted, data),
                )
                .await;
        }

        Ok(Self::outcome(updated, active_ride, notified))
    }

    async fn update_driver_location(&self, ride_id: &str, ping: LocationPing) -> Result<LocationOutcome, AppError> {
        let point = ping.point.normalize()?;
        Validator::new().non_negative("accuracy", ping.accuracy).finish()?;

        let request = self.requests.require(ride_id).await?;
        if let Some(driver_id) = ping.driver_id.as_deref() {
            request.authorize(Party::Driver, driver_id)?;
        }
        if !request.status.is_live() {
            return Err(AppError::invalid_state(format!(
                "ride request {} is {}; location updates need accepted or in_progress",
                ride_id, request.status
            )));
        }

        let now = Utc::now();
        let recorded_at = match ping.recorded_at {
            Some(at) if at > now + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) => {
                tracing::warn!("Ride {} ping stamped {} is ahead of the server clock; using {}", ride_id, at, now);
                now
            }
            Some(at) => at,
            None => now,
        };
        let mut stale = false;
        let apply_ping = |ride: &mut ActiveRide, stale: &mut bool| {
            if ride.is_closed() {
                return Err(AppError::invalid_state(format!(
                    "ride {} is {}; no further location updates",
                    ride_id, ride.current_status
                )));
            }
            *stale = !ride.record_ping(point, recorded_at, ping.accuracy, ping.source);
            Ok(if *stale { Change::Unchanged } else { Change::Apply })
        };

        let updated = match self
            .active_rides
            .update(ride_id, |ride| apply_ping(ride, &mut stale))
            .await
        {
            Err(AppError::ActiveRideNotFound(_)) => {
                self.ensure_active_ride(&request, None).await?;
                self.active_rides
                    .update(ride_id, |ride| apply_ping(ride, &mut stale))
                    .await?
            }
            other => other?,
        };

        if stale {
            tracing::warn!("Ignoring stale location for ride {} recorded at {}", ride_id, recorded_at);
        } else {
            tracing::debug!(
                "Ride {} driver at ({}, {}), {:.2} km so far",
                ride_id,
                point.latitude,
                point.longitude,
                updated.doc.route.total_distance_km
            );
            self.stamp_driver_location(&request.driver_id, point).await;
            self.events
                .publish(
                    RideEvent::LocationUpdated {
                        ride_id: ride_id.to_string(),
                        driver_id: request.driver_id.clone(),
                        location: point,
                        recorded_at,
                        total_distance_km: updated.doc.route.total_distance_km,
                    },
                    &request.driver_id,
                )
                .await;
        }

        Ok(LocationOutcome {
            accepted: !stale,
            stale,
            recorded_at,
            total_distance_km: updated.doc.route.total_distance_km,
        })
    }

    async fn update_tracking_status(&self, ride_id: &str, update: TrackingStatusUpdate) -> Result<ActiveRide, AppError> {
        let required = update.status.required_request_status().ok_or_else(|| {
            AppError::validation_error("status", "completed and cancelled are set by the ride lifecycle")
        })?;
        let mirrored = update.status.tracking_status();

        let request = self.requests.require(ride_id).await?;
        request.authorize(Party::Driver, &update.driver_id)?;
        let wrong_phase = |status: RideStatus| {
            AppError::invalid_state(format!(
                "{} needs the ride to be {}, but it is {}",
                update.status, required, status
            ))
        };
        if request.status != required {
            return Err(wrong_phase(request.status));
        }

        let ride = self
            .active_rides
            .update(ride_id, |ride| {
                if ride.is_closed() {
                    return Err(AppError::invalid_state(format!("ride {ride_id} is already closed")));
                }
                if ride.current_status == update.status {
                    return Ok(Change::Unchanged);
                }
                ride.set_status(update.status, Utc::now());
                Ok(Change::Apply)
            })
            .await?;

        self.requests
            .update(ride_id, |request| {
                if request.status != required {
                    return Err(wrong_phase(request.status));
                }
                let eta = update.estimated_arrival_min.or(request.tracking.estimated_arrival_min);
                if Some(request.tracking.status) == mirrored && request.tracking.estimated_arrival_min == eta {
                    return Ok(Change::Unchanged);
                }
                if let Some(status) = mirrored {
                    request.tracking.status = status;
                }
                request.tracking.estimated_arrival_min = eta;
                request.updated_at = Utc::now();
                Ok(Change::Apply)
            })
            .await?;

        if ride.applied {
            tracing::info!("Ride {} tracking status -> {}", ride_id, update.status);
            self.events
                .publish(
                    RideEvent::TrackingStatusChanged {
                        ride_id: ride_id.to_string(),
                        status: update.status,
                    },
                    &request.driver_id,
                )
                .await;
        }
        Ok(ride.doc)
    }

    async fn raise_emergency(&self, ride_id: &str, input: EmergencyRequest) -> Result<ActiveRide, AppError> {
        let request = self.requests.require(ride_id).await?;
        let raised_by = if input.actor_id == request.rider_id {
            Party::Rider
        } else if input.actor_id == request.driver_id {
            Party::Driver
        } else {
            return Err(AppError::not_authorized(format!(
                "{} is not part of ride {}",
                input.actor_id, ride_id
            )));
        };
        if !request.status.is_live() {
            return Err(AppError::invalid_state(format!(
                "emergencies can only be raised on an active ride; {} is {}",
                ride_id, request.status
            )));
        }

        let notes = clean_text(input.notes);
        let updated = self
            .active_rides
            .update(ride_id, |ride| {
                if ride.emergency.is_active {
                    return Ok(Change::Unchanged);
                }
                ride.emergency.is_active = true;
                ride.emergency.raised_by = Some(raised_by);
                ride.emergency.activated_at = Some(Utc::now());
                ride.emergency.resolved = false;
                ride.emergency.resolved_at = None;
                ride.emergency.notes = notes.clone();
                ride.updated_at = Utc::now();
                Ok(Change::Apply)
            })
            .await?;

        if updated.applied {
            tracing::warn!("Emergency raised on ride {} by {}", ride_id, raised_by);
            self.events
                .publish(
                    RideEvent::EmergencyRaised {
                        ride_id: ride_id.to_string(),
                        raised_by,
                        notes: updated.doc.emergency.notes.clone(),
                    },
                    &request.driver_id,
                )
                .await;
        }
        Ok(updated.doc)
    }

    async fn resolve_emergency(&self, ride_id: &str, input: ResolveEmergencyRequest) -> Result<ActiveRide, AppError> {
        let request = self.requests.require(ride_id).await?;
        let notes = clean_text(input.notes);

        let updated = self
            .active_rides
            .update(ride_id, |ride| {
                if !ride.emergency.is_active {
                    return Ok(Change::Unchanged);
                }
                let now = Utc::now();
                ride.emergency.is_active = false;
                ride.emergency.resolved = true;
                ride.emergency.resolved_at = Some(now);
                if notes.is_some() {
                    ride.emergency.notes = notes.clone();
                }
                ride.updated_at = now;
                Ok(Change::Apply)
            })
            .await?;

        if updated.applied {
            tracing::info!("Emergency on ride {} resolved", ride_id);
            self.events
                .publish(
                    RideEvent::EmergencyResolved {
                        ride_id: ride_id.to_string(),
                        notes: updated.doc.emergency.notes.clone(),
                    },
                    &request.driver_id,
                )
                .await;
        }
        Ok(updated.doc)
    }

    async fn rate_ride(&self, ride_id: &str, input: RateRideRequest) -> Result<RideOutcome, AppError> {
        if !(1..=5).contains(&input.rating) {
            return Err(AppError::validation_error("rating", "must be between 1 and 5"));
        }
        let feedback = clean_text(input.feedback);

        let updated = self
            .requests
            .update(ride_id, |request| {
                request.authorize(input.rater, &input.rater_id)?;
                if request.status != RideStatus::Completed {
                    return Err(AppError::invalid_state(format!(
                        "ride {} is {}; ratings open once it is completed",
                        ride_id, request.status
                    )));
                }
                let slot = request.ratings.slot(input.rater);
                match slot {
                    Some(existing) if existing.rating == input.rating && existing.feedback == feedback => {
                        Ok(Change::Unchanged)
                    }
                    Some(_) => Err(AppError::conflict(format!(
                        "the {} has already rated ride {}",
                        input.rater, ride_id
                    ))),
                    None => {
                        *slot = Some(RatingEntry {
                            rating: input.rating,
                            feedback: feedback.clone(),
                            rated_at: Utc::now(),
                        });
                        request.updated_at = Utc::now();
                        Ok(Change::Apply)
                    }
                }
            })
            .await?;

        if updated.applied {
            let request = &updated.doc;
            let counterpart = match input.rater {
                Party::Rider => self.drivers.record_rating(&request.driver_id, input.rating).await,
                Party::Driver => self.riders.record_rating(&request.rider_id, input.rating).await,
            };
            match counterpart {
                Ok(summary) => tracing::info!(
                    "Ride {} rated {} by the {}; counterpart now {:.2} over {}",
                    ride_id,
                    input.rating,
                    input.rater,
                    summary.average,
                    summary.total_ratings
                ),
                Err(e) => tracing::warn!("Rating for ride {} not aggregated: {}", ride_id, e),
            }
        }

        Ok(Self::outcome(updated, None, false))
    }

    async fn get_request(&self, ride_id: &str) -> Result<RideRequest, AppError> {
        tracing::debug!("Getting ride request: {}", ride_id);
        self.requests.require(ride_id).await
    }

    async fn get_active_ride(&self, ride_id: &str) -> Result<ActiveRide, AppError> {
        self.active_rides.require(ride_id).await
    }

    async fn ride_locations(&self, ride_id: &str) -> Result<RideLocations, AppError> {
        let request = self.requests.require(ride_id).await?;
        let active = self.load_active(ride_id).await?;
        let mut locations = RideLocations::from_records(&request, active.as_ref());

        if locations.driver_location.is_none() {
            locations.driver_location = self
                .drivers
                .get_driver(&request.driver_id)
                .await?
                .and_then(|driver| driver.current_location);
        }

        let shared = self
            .riders
            .get_rider(&request.rider_id)
            .await?
            .and_then(|rider| rider.current_location);
        if let Some(fix) = shared {
            locations.rider_location = fix;
            locations.rider_location_source = "rider";
        }
        Ok(locations)
    }

    async fn pending_for_driver(&self, driver_id: &str) -> Result<Vec<RideRequest>, AppError> {
        self.drivers.require_driver(driver_id).await?;
        let ids = self.indexes.members(&StoreKeys::driver_requests(driver_id)).await?;

        let mut pending: Vec<RideRequest> = self
            .requests
            .get_many(&ids)
            .await?
            .into_iter()
            .filter(|request| request.status == RideStatus::Pending && request.driver_id == driver_id)
            .collect();
        pending.sort_by_key(|request| request.request_time);
        Ok(pending)
    }

    async fn requests_for_rider(&self, rider_id: &str, filter: RequestFilter) -> Result<Vec<RideRequest>, AppError> {
        let ids = self.indexes.members(&StoreKeys::rider_requests(rider_id)).await?;

        let mut requests: Vec<RideRequest> = self
            .requests
            .get_many(&ids)
            .await?
            .into_iter()
            .filter(|request| request.rider_id == rider_id && filter.matches(request.status))
            .collect();
        requests.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(requests)
    }
}
