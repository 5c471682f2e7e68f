//! Prometheus metrics endpoint.

use axum::{extract::State, http::header, response::IntoResponse};

use crate::error::{AppError, Result};
use crate::metrics::{self, ConnectionMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.hub.stats();
    ConnectionMetrics::record_snapshot(
        stats.total_connections,
        stats.active_users,
        stats.topics.len(),
    );

    let output = metrics::encode_metrics()
        .map_err(|e| AppError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    ))
}
