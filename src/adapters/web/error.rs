use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::error::{EngineError, ErrorStatus};

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    status: u16,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<EngineError> for WebError {
    fn from(err: EngineError) -> Self {
        let status = status_from_error(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for an engine error. Short price history is reported as
/// unprocessable rather than as a malformed request.
pub fn status_from_error(err: &EngineError) -> StatusCode {
    match (err, err.status()) {
        (EngineError::InsufficientData { .. }, _) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, ErrorStatus::Client) => StatusCode::BAD_REQUEST,
        (_, ErrorStatus::NotFound) => StatusCode::NOT_FOUND,
        (_, ErrorStatus::Server) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
