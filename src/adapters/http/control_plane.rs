//! HTTP handler for `POST /internal/notify`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::application::{ControlPlane, ControlRequest};
use crate::domain::foundation::{DomainError, ErrorCode};

use super::error::{AckResponse, ApiError};

// ════════════════════════════════════════════════════════════════════════════
// Handler state
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ControlPlaneState {
    control_plane: Arc<ControlPlane>,
}

impl ControlPlaneState {
    pub fn new(control_plane: Arc<ControlPlane>) -> Self {
        Self { control_plane }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP handlers
// ════════════════════════════════════════════════════════════════════════════

/// POST /internal/notify - Fan a room or game change out to connections
pub async fn notify(
    State(state): State<ControlPlaneState>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError(DomainError::new(ErrorCode::InvalidFormat, rejection.body_text()))
                .into_response()
        }
    };

    let action = request.action.clone();
    let room_id = request.room_id.clone();

    match state.control_plane.handle(request).await {
        Ok(_) => (StatusCode::OK, Json(AckResponse::success())).into_response(),
        Err(e) => {
            tracing::info!(action = %action, room_id = %room_id, code = %e.code, "Notification rejected");
            ApiError(e).into_response()
        }
    }
}
