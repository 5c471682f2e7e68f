//! Administrative connection control.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::error::{AppError, Result};
use crate::hub::{CloseReason, ConnectionId};
use crate::server::AppState;

/// DELETE /api/v1/connections/{connection_id} - close one connection (code 1000)
#[tracing::instrument(name = "api.disconnect", skip(state))]
pub async fn disconnect_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
) -> Result<StatusCode> {
    if state.hub.disconnect(connection_id, CloseReason::Admin) {
        tracing::info!(connection_id = %connection_id, "Connection closed by admin request");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "Connection '{}' not found",
            connection_id
        )))
    }
}
