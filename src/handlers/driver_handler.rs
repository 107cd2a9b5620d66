// src/handlers/driver_handler.rs
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::Payload;
use crate::{
    errors::PoolmateError as AppError,
    models::driver::{DriverRegistration, DriverResponse, DriverStatusUpdate},
    models::location::PointInput,
    models::ride_request::RideRequest,
    services::driver_service::DriverOperations,
    services::ride_service::RideOperations,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    #[serde(alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(alias = "longitude", alias = "lon")]
    pub lng: Option<f64>,
    #[serde(alias = "radiusKm", alias = "radius")]
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

pub async fn register_driver(
    State(state): State<Arc<AppState>>,
    Payload(registration): Payload<DriverRegistration>,
) -> Result<(StatusCode, Json<DriverResponse>), AppError> {
    let driver = state.driver_service.register_driver(registration).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> Result<Json<DriverResponse>, AppError> {
    let driver = state.driver_service.require_driver(&driver_id).await?;
    Ok(Json(DriverResponse::from(driver)))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Payload(update): Payload<DriverStatusUpdate>,
) -> Result<Json<DriverResponse>, AppError> {
    Ok(Json(state.driver_service.set_availability(&driver_id, update).await?))
}

pub async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<Value>, AppError> {
    let (Some(lat), Some(lng)) = (params.lat, params.lng) else {
        return Err(AppError::MissingRequiredField("lat and lng".to_string()));
    };
    let point = PointInput::from_lat_lng(lat, lng).normalize()?;

    let drivers = state
        .driver_service
        .find_nearby_available(point, params.radius_km, params.limit)
        .await?;
    Ok(Json(json!({ "count": drivers.len(), "drivers": drivers })))
}

pub async fn pending_requests(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> Result<Json<Vec<RideRequest>>, AppError> {
    Ok(Json(state.ride_service.pending_for_driver(&driver_id).await?))
}
