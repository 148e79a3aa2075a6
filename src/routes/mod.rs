use axum::Router;

use crate::state::SharedState;

/// Swagger UI and the OpenAPI document.
pub mod docs;
/// Health check route.
pub mod health;
/// Metrics route.
pub mod metrics;
/// Session bootstrap routes.
pub mod sessions;
/// WebSocket upgrade route.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(metrics::router())
        .merge(sessions::router())
        .merge(websocket::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{game_store::GameStore, memory::MemoryGameStore},
        state::AppState,
    };

    async fn app() -> Router<()> {
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
        router(AppState::with_store(AppConfig::default(), store).await)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn created_session_can_be_fetched_by_code() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(post_json(
                "/sessions",
                json!({ "hostId": "host-1", "settings": { "maxPlayers": 4 }, "roundCount": 3 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["settings"]["maxPlayers"], 4);
        assert_eq!(created["settings"]["roundCount"], 3);

        let code = created["code"].as_str().unwrap();
        let response = app
            .oneshot(Request::get(format!("/sessions/{code}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["status"], "created");
        assert_eq!(snapshot["hostId"], "host-1");
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(post_json("/sessions", json!({ "hostId": "", "roundCount": 0 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(Request::get("/sessions/ZZZZZZ").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn monitoring_endpoints_answer() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "ok");

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let metrics = body_json(response).await;
        assert_eq!(metrics["global"]["activeConnections"], 0);
    }
}
