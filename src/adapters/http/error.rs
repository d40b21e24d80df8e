//! Mapping from domain failures to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, ErrorCode};

/// Error body shared by every endpoint.
///
/// `code` repeats the HTTP status so callers that only look at the body
/// (the room service does) can still branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Acknowledgement returned by the control plane on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub code: u16,
    pub message: String,
}

impl AckResponse {
    pub fn success() -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
        }
    }
}

/// A [`DomainError`] on its way out of an HTTP handler.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        status_for(self.0.code)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationFailed | ErrorCode::InvalidFormat | ErrorCode::UnknownAction => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::RoomNotFound | ErrorCode::GameStateNotFound => StatusCode::NOT_FOUND,
        ErrorCode::LockTimeout => StatusCode::CONFLICT,
        ErrorCode::CacheError | ErrorCode::BusError | ErrorCode::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = %self.0.code, error = %self.0.message, "Request failed");
        }

        let body = ErrorResponse {
            code: status.as_u16(),
            message: self.0.message,
            error: Some(self.0.code.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(status_for(ErrorCode::InvalidFormat), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::UnknownAction), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorCode::GameStateNotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn lock_timeout_is_conflict() {
        assert_eq!(status_for(ErrorCode::LockTimeout), StatusCode::CONFLICT);
    }

    #[test]
    fn infrastructure_errors_are_500() {
        let err = ApiError(DomainError::new(ErrorCode::CacheError, "redis down"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ack_shape_is_fixed() {
        let json = serde_json::to_value(AckResponse::success()).unwrap();
        assert_eq!(json, serde_json::json!({"code": 0, "message": "success"}));
    }
}
