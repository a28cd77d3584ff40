//! HTTP-facing error type.
//!
//! The market core reports failures as `anyhow::Error`; the API boundary
//! maps them onto status codes per the intake contract: validation errors
//! are 4xx, missing entities 404, store failures 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed date or other unprocessable field.
    InvalidDate(&'static str),
    /// Unknown resolution outcome string.
    InvalidOutcome,
    /// Resolution attempted on an already-resolved goal.
    AlreadyResolved,
    /// Update posted against a resolved goal.
    GoalNotActive,
    /// Referenced entity does not exist.
    NotFound(&'static str),
    /// Persistence failure; logged, surfaced as 500.
    Store(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::InvalidDate(expected) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Date must be in {expected} format"),
            ),
            ApiError::InvalidOutcome => (
                StatusCode::BAD_REQUEST,
                "Outcome must be 'success' or 'failure'".to_string(),
            ),
            ApiError::AlreadyResolved => (
                StatusCode::BAD_REQUEST,
                "Goal is already resolved".to_string(),
            ),
            ApiError::GoalNotActive => (
                StatusCode::BAD_REQUEST,
                "Goal is not active".to_string(),
            ),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Store(e) => {
                error!("store failure: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Store(e)
    }
}
