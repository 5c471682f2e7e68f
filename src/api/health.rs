//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::dispatch::DispatcherStatsSnapshot;
use crate::hub::HubStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub unique_users: usize,
    pub subscriptions: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub hub: HubStats,
    pub dispatcher: DispatcherStatsSnapshot,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: ConnectionHealthResponse {
            total: state.hub.total_connections(),
            unique_users: state.hub.count_active_users(),
            subscriptions: state.hub.total_subscriptions(),
        },
    })
}

/// GET /stats - hub snapshot plus dispatcher counters
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        hub: state.hub.stats(),
        dispatcher: state.dispatcher.stats(),
    })
}
