use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Outbound WebSocket event payloads.
pub mod events;
/// Health check payloads.
pub mod health;
/// Metrics endpoint payloads.
pub mod metrics;
/// REST session payloads.
pub mod session;
pub mod validation;
/// Inbound WebSocket envelope and payloads.
pub mod ws;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
