use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::DalError;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Validation(String),
    Unauthorized(String),
    MfaRequired,
    Forbidden(String),
    Conflict(String),
    RateLimited(String),
    Internal(String),
    Dal(DalError),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::MfaRequired => "MFA_REQUIRED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimited(_) => "RATE_LIMITED",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Dal(err) => match err {
                DalError::Unavailable(_) => "SERVICE_UNAVAILABLE",
                DalError::Conflict(_) => "CONFLICT",
                DalError::InvalidInput(_) => "VALIDATION_ERROR",
                _ => "INTERNAL_ERROR",
            },
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::Validation(msg) => write!(f, "Validation Error: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            AppError::MfaRequired => write!(f, "Unauthorized: second factor required"),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            AppError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            AppError::RateLimited(msg) => write!(f, "Rate Limited: {msg}"),
            AppError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            AppError::Dal(err) => write!(f, "Storage Error: {err}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::MfaRequired => (
                StatusCode::UNAUTHORIZED,
                "A verification code is required".to_string(),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Dal(err) => match err {
                DalError::Unavailable(msg) => {
                    tracing::warn!("Storage unavailable: {msg}");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Service temporarily unavailable, please retry".to_string(),
                    )
                }
                DalError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
                DalError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                other => {
                    tracing::error!("Storage error: {other}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        let body = json!({
            "success": false,
            "error": { "code": code, "message": message },
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DalError> for AppError {
    fn from(err: DalError) -> Self {
        AppError::Dal(err)
    }
}
