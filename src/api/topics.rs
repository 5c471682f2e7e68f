//! Topic and connection inspection endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::hub::{TopicInfo, UserConnectionsInfo};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct TopicListResponse {
    pub topics: Vec<TopicInfo>,
    pub total_topics: usize,
}

/// GET /api/v1/topics - topics with at least one subscriber
pub async fn list_topics(State(state): State<AppState>) -> Json<TopicListResponse> {
    let topics = state.hub.list_topics();
    let total_topics = topics.len();

    Json(TopicListResponse {
        topics,
        total_topics,
    })
}

/// GET /api/v1/topics/{topic_id}
pub async fn get_topic(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
) -> Result<Json<TopicInfo>> {
    state.hub.topic_info(&topic_id).map(Json).ok_or_else(|| {
        AppError::NotFound(format!("Topic '{}' not found or has no subscribers", topic_id))
    })
}

/// GET /api/v1/users/{user_id}/connections
pub async fn get_user_connections(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserConnectionsInfo>> {
    state
        .hub
        .user_connections(&user_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("User '{}' has no active connections", user_id)))
}
