use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::metrics::MetricsSnapshot, state::SharedState};

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses((status = 200, description = "Global and per-session counters", body = MetricsSnapshot))
)]
/// Expose connection, message, error and per-session counters.
pub async fn metrics(State(state): State<SharedState>) -> Json<MetricsSnapshot> {
    Json(
        state
            .metrics()
            .snapshot(state.connections().active_connections()),
    )
}

/// Routes serving the metrics snapshot.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/metrics", get(metrics))
}
