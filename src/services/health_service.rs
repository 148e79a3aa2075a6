use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the store and report liveness counters. A failed ping flips degraded mode.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.game_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                state.update_degraded(true);
            }
        },
        None => warn!("no storage backend installed (degraded mode)"),
    }

    HealthResponse::new(
        state.is_degraded(),
        state.sessions().len(),
        state.connections().active_connections(),
    )
}
