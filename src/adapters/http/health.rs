//! Liveness endpoint.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::adapters::websocket::Hub;
use crate::domain::foundation::InstanceId;

#[derive(Clone)]
pub struct HealthState {
    instance_id: InstanceId,
    hub: Arc<Hub>,
}

impl HealthState {
    pub fn new(instance_id: InstanceId, hub: Arc<Hub>) -> Self {
        Self { instance_id, hub }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub instance_id: String,
    pub connections: usize,
    pub rooms: usize,
}

/// GET /health
pub async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        instance_id: state.instance_id.to_string(),
        connections: state.hub.client_count(),
        rooms: state.hub.room_count(),
    };
    (StatusCode::OK, Json(response))
}
