use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::AppState;

use super::{
    disconnect_connection, get_topic, get_user_connections, health, list_topics,
    prometheus_metrics, publish_to_topic, send_to_user, stats,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Producers
                .route("/topics/{topic_id}/messages", post(publish_to_topic))
                .route("/users/{user_id}/messages", post(send_to_user))
                // Inspection
                .route("/topics", get(list_topics))
                .route("/topics/{topic_id}", get(get_topic))
                .route("/users/{user_id}/connections", get(get_user_connections))
                // Admin
                .route("/connections/{connection_id}", delete(disconnect_connection)),
        )
}
