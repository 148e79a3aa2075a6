use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Sessions currently held in memory.
    pub live_sessions: usize,
    /// Open WebSocket connections.
    pub active_connections: usize,
}

impl HealthResponse {
    /// Create a health response; `degraded` selects the status label.
    pub fn new(degraded: bool, live_sessions: usize, active_connections: usize) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            live_sessions,
            active_connections,
        }
    }
}
