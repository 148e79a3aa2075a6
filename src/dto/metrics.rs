use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Body of `GET /metrics`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    /// Process-wide counters.
    pub global: GlobalMetrics,
    /// One entry per live session.
    pub sessions: Vec<SessionMetrics>,
}

/// Process-wide counters.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    /// Sockets accepted since startup.
    pub connections_opened: u64,
    /// Sockets currently open.
    pub active_connections: u64,
    /// Inbound frames received.
    pub messages_received: u64,
    /// Outbound frames queued.
    pub messages_sent: u64,
    /// Error events sent to clients.
    pub errors: u64,
    /// Events refused by the rate limiter.
    pub rate_limited: u64,
    /// Sessions created since startup.
    pub sessions_created: u64,
    /// Sessions that reached `completed`.
    pub sessions_completed: u64,
    /// Error events sent, keyed by error code.
    pub errors_by_code: BTreeMap<String, u64>,
}

/// Counters of one live session.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Session id.
    pub session_id: Uuid,
    /// Join code.
    pub code: String,
    /// Inbound frames attributed to the session.
    pub messages: u64,
    /// Answers recorded.
    pub answers: u64,
    /// Buzz-ins recorded.
    pub buzzes: u64,
    /// Errors raised while handling the session's events.
    pub errors: u64,
    /// Lifecycle transitions applied.
    pub transitions: u64,
}
