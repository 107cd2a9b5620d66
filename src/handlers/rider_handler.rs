// src/handlers/rider_handler.rs
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use super::Payload;
use crate::{
    errors::PoolmateError as AppError,
    models::location::PointInput,
    models::ride_request::{RequestFilter, RideRequest},
    models::rider::{RiderRegistration, RiderResponse},
    services::ride_service::RideOperations,
    services::rider_service::RiderOperations,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct BookingParams {
    pub status: Option<String>,
}

pub async fn register_rider(
    State(state): State<Arc<AppState>>,
    Payload(registration): Payload<RiderRegistration>,
) -> Result<(StatusCode, Json<RiderResponse>), AppError> {
    let rider = state.rider_service.register_rider(registration).await?;
    Ok((StatusCode::CREATED, Json(rider)))
}

pub async fn get_rider(
    State(state): State<Arc<AppState>>,
    Path(rider_id): Path<String>,
) -> Result<Json<RiderResponse>, AppError> {
    let rider = state.rider_service.require_rider(&rider_id).await?;
    Ok(Json(RiderResponse::from(rider)))
}

pub async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(rider_id): Path<String>,
    Payload(location): Payload<PointInput>,
) -> Result<Json<RiderResponse>, AppError> {
    let point = location.normalize()?;
    let rider = state.rider_service.update_location(&rider_id, point).await?;
    Ok(Json(RiderResponse::from(rider)))
}

pub async fn ride_requests(
    State(state): State<Arc<AppState>>,
    Path(rider_id): Path<String>,
    Query(params): Query<BookingParams>,
) -> Result<Json<Vec<RideRequest>>, AppError> {
    let filter = RequestFilter::parse(params.status.as_deref())?;
    Ok(Json(state.ride_service.requests_for_rider(&rider_id, filter).await?))
}
