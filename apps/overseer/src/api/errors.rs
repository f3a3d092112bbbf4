use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::overseer::OverseerError;

/// API error type with HTTP status code and message
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Creates a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<OverseerError> for ApiError {
    fn from(err: OverseerError) -> Self {
        let status = match &err {
            OverseerError::NoAvailableAgent | OverseerError::SwarmInactive => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            OverseerError::DuplicateTaskId(_) => StatusCode::CONFLICT,
            OverseerError::UnknownTask(_) => StatusCode::NOT_FOUND,
            OverseerError::SnapshotInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OverseerError::Network(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}
