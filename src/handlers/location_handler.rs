// src/handlers/location_handler.rs
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use super::Payload;
use crate::{
    errors::PoolmateError as AppError,
    models::ride_request::{LocationPing, TrackingStatusUpdate},
    services::ride_service::{LocationOutcome, RideLocations, RideOperations},
    state::AppState,
};

pub async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(ping): Payload<LocationPing>,
) -> Result<Json<LocationOutcome>, AppError> {
    Ok(Json(state.ride_service.update_driver_location(&ride_id, ping).await?))
}

pub async fn ride_locations(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
) -> Result<Json<RideLocations>, AppError> {
    Ok(Json(state.ride_service.ride_locations(&ride_id).await?))
}

pub async fn update_tracking_status(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Payload(update): Payload<TrackingStatusUpdate>,
) -> Result<Json<Value>, AppError> {
    let ride = state.ride_service.update_tracking_status(&ride_id, update).await?;
    Ok(Json(json!({
        "ride_id": ride_id,
        "current_status": ride.current_status,
        "active_ride": ride,
    })))
}
