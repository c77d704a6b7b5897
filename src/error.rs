use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule rejection: the record's current state is outside the
    /// trigger's allowed source set, including a lost claim race. The
    /// message carries the current state so the caller can refresh.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl AppError {
    pub fn illegal(reason: impl std::fmt::Display, current: OrderStatus) -> Self {
        AppError::IllegalTransition(format!("{reason} (current status: {current})"))
    }

    /// Every write behind this error is conditional on expected prior
    /// state, so replaying the same trigger is always safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Infrastructure(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::IllegalTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Infrastructure(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}
