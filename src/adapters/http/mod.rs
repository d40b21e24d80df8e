//! HTTP adapters - the Axum router for the realtime service.
//!
//! | route               | purpose                                   |
//! |---------------------|-------------------------------------------|
//! | `GET /ws`           | WebSocket upgrade for players             |
//! | `POST /internal/notify` | control-plane notifications            |
//! | `GET /health`       | liveness and local connection counts      |

pub mod control_plane;
pub mod error;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use http::{HeaderValue, Method};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::adapters::websocket::ws_handler;
use crate::application::AppContext;
use crate::config::ServerConfig;

pub use control_plane::{notify, ControlPlaneState};
pub use error::{AckResponse, ApiError, ErrorResponse};
pub use health::{health, HealthResponse, HealthState};

/// Builds the full router from the application context.
///
/// The request timeout applies to `/internal/notify` only; WebSocket
/// sessions outlive any HTTP timeout.
pub fn router(ctx: &AppContext) -> Router {
    let server = &ctx.config().server;

    let websocket = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(ctx.websocket_state());

    let internal = Router::new()
        .route("/internal/notify", post(notify))
        .with_state(ControlPlaneState::new(ctx.control_plane().clone()))
        .layer(TimeoutLayer::new(server.request_timeout()));

    let health_routes = Router::new()
        .route("/health", get(health))
        .with_state(HealthState::new(ctx.instance_id().clone(), ctx.hub().clone()));

    Router::new()
        .merge(websocket)
        .merge(internal)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(server)),
        )
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() && !server.is_production() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::application::AppContextBuilder;
    use crate::config::AppConfig;
    use crate::domain::foundation::InstanceId;

    fn context() -> Arc<AppContext> {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "secret".into();
        AppContextBuilder::new(config)
            .instance_id(InstanceId::new("i-test"))
            .build()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn notify_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/internal/notify")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_instance_and_counts() {
        let ctx = context();
        let response = router(&ctx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["instance_id"], "i-test");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["rooms"], 0);
    }

    #[tokio::test]
    async fn notify_acknowledges_lobby_event() {
        let ctx = context();
        let response = router(&ctx)
            .oneshot(notify_request(r#"{"action":"room_created","room_id":"r1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["message"], "success");
    }

    #[tokio::test]
    async fn notify_rejects_malformed_body() {
        let ctx = context();
        let response = router(&ctx)
            .oneshot(notify_request("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert_eq!(body["error"], "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn notify_rejects_unknown_action() {
        let ctx = context();
        let response = router(&ctx)
            .oneshot(notify_request(r#"{"action":"shuffle","room_id":"r1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "UNKNOWN_ACTION");
    }

    #[tokio::test]
    async fn notify_game_action_without_state_is_not_found() {
        let ctx = context();
        let response = router(&ctx)
            .oneshot(notify_request(
                r#"{"action":"game_started","room_id":"r1","user_id":7}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn cors_is_restricted_in_production() {
        let mut server = ServerConfig::default();
        server.cors_origins = Some("https://play.example.com, ,bad\norigin".into());
        server.environment = crate::config::Environment::Production;
        // Building the layer must not panic on unparsable origins.
        let _ = cors_layer(&server);
    }
}
