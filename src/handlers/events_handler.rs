// src/handlers/events_handler.rs
use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use nanoid::nanoid;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    errors::PoolmateError as AppError,
    services::broadcast_service::EventHub,
    services::driver_service::DriverOperations,
    services::ride_service::RideOperations,
    state::AppState,
};

pub async fn ride_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
) -> Result<Response, AppError> {
    state.ride_service.get_request(&ride_id).await?;

    let topic = EventHub::ride_topic(&ride_id);
    let hub = Arc::clone(&state.events);
    Ok(ws.on_upgrade(move |socket| stream_events(socket, hub, topic)))
}

pub async fn driver_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> Result<Response, AppError> {
    state.driver_service.require_driver(&driver_id).await?;

    let topic = EventHub::driver_topic(&driver_id);
    let hub = Arc::clone(&state.events);
    Ok(ws.on_upgrade(move |socket| stream_events(socket, hub, topic)))
}

async fn stream_events(socket: WebSocket, hub: Arc<EventHub>, topic: String) {
    let mut receiver = hub.subscribe(&topic).await;
    let connection_id = nanoid!(10);
    tracing::info!("Subscriber {} joined {}", connection_id, topic);

    let (mut outbound, mut inbound) = socket.split();
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("Could not encode {} for {}: {}", event.name(), topic, e);
                            continue;
                        }
                    };
                    if outbound.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber {} on {} lagged, skipped {} events", connection_id, topic, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Client chatter is ignored; this channel is one-way.
                Some(Ok(_)) => {}
            },
        }
    }

    drop(receiver);
    hub.release(&topic).await;
    tracing::info!("Subscriber {} left {}", connection_id, topic);
}
