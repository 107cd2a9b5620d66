// src/handlers/mod.rs
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
    routing::{get, post, put},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::errors::PoolmateError as AppError;
use crate::services::ride_service::RideOutcome;
use crate::state::AppState;

pub mod driver_handler;
pub mod events_handler;
pub mod location_handler;
pub mod ride_handler;
pub mod rider_handler;

/// JSON body whose rejections render as our 400 error shape.
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        Ok(Payload(value))
    }
}

pub(crate) fn outcome_body(outcome: RideOutcome) -> Value {
    json!({
        "request_id": outcome.request.id,
        "status": outcome.request.status,
        "applied": outcome.applied,
        "notified": outcome.notified,
        "request": outcome.request,
        "active_ride": outcome.active_ride,
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "storage": state.store.backend_name(),
        "time": Utc::now(),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ride-requests", post(ride_handler::create_request))
        .route("/ride-requests/:id", get(ride_handler::get_request))
        .route("/ride-requests/:id/accept", put(ride_handler::accept_request))
        .route("/ride-requests/:id/reject", put(ride_handler::reject_request))
        .route("/rides/:id", get(ride_handler::get_active_ride))
        .route("/rides/:id/cancel", post(ride_handler::cancel_ride))
        .route("/rides/:id/abort", post(ride_handler::abort_ride))
        .route("/rides/:id/start", post(ride_handler::start_ride))
        .route("/rides/:id/complete", post(ride_handler::complete_ride))
        .route("/rides/:id/rate", post(ride_handler::rate_ride))
        .route("/rides/:id/locations", get(location_handler::ride_locations))
        .route("/rides/:id/tracking-status", post(location_handler::update_tracking_status))
        .route("/rides/:id/emergency", post(ride_handler::raise_emergency))
        .route("/rides/:id/emergency/resolve", post(ride_handler::resolve_emergency))
        .route("/rides/:id/events", get(events_handler::ride_events))
        .route("/locations/:id", post(location_handler::update_driver_location))
        .route("/drivers", post(driver_handler::register_driver))
        .route("/drivers/nearby", get(driver_handler::nearby_drivers))
        .route("/drivers/:id", get(driver_handler::get_driver))
        .route("/drivers/:id/status", put(driver_handler::update_status))
        .route("/drivers/:id/ride-requests", get(driver_handler::pending_requests))
        .route("/drivers/:id/events", get(events_handler::driver_events))
        .route("/riders", post(rider_handler::register_rider))
        .route("/riders/:id", get(rider_handler::get_rider))
        .route("/riders/:id/location", put(rider_handler::update_location))
        .route("/riders/:id/ride-requests", get(rider_handler::ride_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
