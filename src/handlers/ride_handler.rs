// src/handlers/ride_handler.rs
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use super::{Payload, outcome_body};
use crate::{
    errors::PoolmateError as AppError,
    models::active_ride::ActiveRide,
    models::ride_request::{
        AbortRideRequest, AcceptRideRequest, CancelRideRequest, CompleteRideRequest, CreateRideRequest,
        EmergencyRequest, RateRideRequest, RejectRideRequest, ResolveEmergencyRequest, RideRequest,
        StartRideRequest,
    },
    services::ride_service::{RideLocations, RideOperations},
    state::AppState,
};

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Payload(input): Payload<CreateRideRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = state.ride_service.create_request(input).await?;
    Ok((StatusCode::CREATED, Json(outcome_body(outcome))))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(state.ride_service.get_request(&ride_id).await?))
}

pub async fn accept_request(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<AcceptRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.accept_request(&ride_id, input).await?;
    // The accept is committed; a failed lookup only costs the directory's view.
    let locations = match state.ride_service.ride_locations(&ride_id).await {
        Ok(locations) => locations,
        Err(e) => {
            tracing::warn!("Locations for accepted ride {} unavailable: {}", ride_id, e);
            RideLocations::from_records(&outcome.request, outcome.active_ride.as_ref())
        }
    };

    let mut body = outcome_body(outcome);
    body["driver_location"] = json!(locations.driver_location);
    body["rider_location"] = json!(locations.rider_location);
    body["rider_location_source"] = json!(locations.rider_location_source);
    Ok(Json(body))
}

pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<RejectRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.reject_request(&ride_id, input).await?;
    Ok(Json(outcome_body(outcome)))
}

pub async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<CancelRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.cancel_request(&ride_id, input).await?;
    Ok(Json(outcome_body(outcome)))
}

pub async fn abort_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<AbortRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.abort_ride(&ride_id, input).await?;
    Ok(Json(outcome_body(outcome)))
}

pub async fn start_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<StartRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.start_ride(&ride_id, input).await?;
    Ok(Json(outcome_body(outcome)))
}

pub async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<CompleteRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.complete_ride(&ride_id, input).await?;
    let actual_fare = outcome.request.actual_fare;

    let mut body = outcome_body(outcome);
    body["actual_fare"] = json!(actual_fare);
    Ok(Json(body))
}

pub async fn get_active_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
) -> Result<Json<ActiveRide>, AppError> {
    Ok(Json(state.ride_service.get_active_ride(&ride_id).await?))
}

pub async fn rate_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<RateRideRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.ride_service.rate_ride(&ride_id, input).await?;
    Ok(Json(json!({
        "request_id": outcome.request.id,
        "applied": outcome.applied,
        "ratings": outcome.request.ratings,
    })))
}

pub async fn raise_emergency(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<EmergencyRequest>,
) -> Result<Json<Value>, AppError> {
    let ride = state.ride_service.raise_emergency(&ride_id, input).await?;
    Ok(Json(json!({ "ride_id": ride_id, "emergency": ride.emergency })))
}

pub async fn resolve_emergency(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(input): Payload<ResolveEmergencyRequest>,
) -> Result<Json<Value>, AppError> {
    let ride = state.ride_service.resolve_emergency(&ride_id, input).await?;
    Ok(Json(json!({ "ride_id": ride_id, "emergency": ride.emergency })))
}
