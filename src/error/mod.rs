use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the HTTP layer
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Internal details are hidden from clients when RUN_MODE is production
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let detail = match &self {
            AppError::Auth(msg)
            | AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Internal(msg) => msg.clone(),
        };

        if status.is_server_error() {
            tracing::error!(code, status = status.as_u16(), message = %detail, "API error");
        } else {
            tracing::warn!(code, status = status.as_u16(), message = %detail, "API error");
        }

        let message = if status.is_server_error() && is_production() {
            "Internal server error".to_string()
        } else {
            detail
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
