use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        events::GameStateSnapshot,
        session::{CreateSessionRequest, SessionCreated},
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes bootstrapping and inspecting live sessions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{code}", get(get_session))
}

/// Open a new session and hand out its join code.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionCreated),
        (status = 400, description = "Invalid payload"),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Create a session in the `created` state.
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionCreated>, AppError> {
    let created = session_service::create_session(&state, payload).await?;
    Ok(Json(created))
}

/// Current snapshot of a session, loading it from storage when it is not live.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Six character join code")),
    responses(
        (status = 200, description = "Session snapshot", body = GameStateSnapshot),
        (status = 404, description = "Unknown join code")
    )
)]
/// Snapshot of a session by join code.
pub async fn get_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<GameStateSnapshot>, AppError> {
    let snapshot = session_service::snapshot(&state, &code).await?;
    Ok(Json(snapshot))
}
