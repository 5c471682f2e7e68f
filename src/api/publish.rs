//! Producer endpoints. The raw request body is the payload, forwarded as-is.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::dispatch::DeliveryReport;
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::websocket::{is_valid_topic, Payload};

fn payload_from(body: String) -> Result<Payload> {
    let payload = Payload::from(body);
    if payload.is_empty() {
        return Err(AppError::Validation("Message body must not be empty".to_string()));
    }
    Ok(payload)
}

/// POST /api/v1/topics/{topic_id}/messages
#[tracing::instrument(name = "api.publish_topic", skip(state, body), fields(bytes = body.len()))]
pub async fn publish_to_topic(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
    body: String,
) -> Result<Json<DeliveryReport>> {
    if !is_valid_topic(&topic_id) {
        return Err(AppError::Validation(format!("Invalid topic: {}", topic_id)));
    }
    let payload = payload_from(body)?;

    Ok(Json(state.dispatcher.publish_to_topic(&topic_id, payload)))
}

/// POST /api/v1/users/{user_id}/messages
#[tracing::instrument(name = "api.send_user", skip(state, body), fields(bytes = body.len()))]
pub async fn send_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: String,
) -> Result<Json<DeliveryReport>> {
    let payload = payload_from(body)?;

    Ok(Json(state.dispatcher.send_to_user(&user_id, payload)))
}
