use std::{collections::{HashMap, VecDeque}, time::Duration};

use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::Instant;

use crate::{error::ServiceError, state::connections::ConnectionId};

/// Admission budget for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimit {
    /// Events admitted per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimit {
    /// Budget of `max_requests` per `window_secs`.
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Sliding-window limiter keyed by (connection, event type).
pub struct RateLimiter {
    default: RateLimit,
    overrides: HashMap<String, RateLimit>,
    windows: DashMap<(ConnectionId, String), VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter using `default` for events without an override.
    pub fn new(default: RateLimit, overrides: HashMap<String, RateLimit>) -> Self {
        Self {
            default,
            overrides,
            windows: DashMap::new(),
        }
    }

    /// Budget that applies to `event`.
    pub fn limit_for(&self, event: &str) -> RateLimit {
        self.overrides.get(event).copied().unwrap_or(self.default)
    }

    /// Admit one `event` from `connection_id` or fail with `RateLimitExceeded`.
    pub fn check(&self, connection_id: ConnectionId, event: &str) -> Result<(), ServiceError> {
        self.check_at(connection_id, event, Instant::now())
    }

    /// Admit or reject one event observed at `now`.
    pub fn check_at(
        &self,
        connection_id: ConnectionId,
        event: &str,
        now: Instant,
    ) -> Result<(), ServiceError> {
        let limit = self.limit_for(event);
        let window = limit.window();
        let mut hits = self
            .windows
            .entry((connection_id, event.to_string()))
            .or_default();

        while hits
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= window)
        {
            hits.pop_front();
        }

        if hits.len() >= limit.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            return Err(ServiceError::RateLimitExceeded {
                event: event.to_string(),
                retry_after: retry_after.as_secs_f64().ceil().max(1.0) as u64,
            });
        }

        hits.push_back(now);
        Ok(())
    }

    /// Drop every window held for a closed connection.
    pub fn forget(&self, connection_id: ConnectionId) {
        self.windows.retain(|(id, _), _| *id != connection_id);
    }

    #[cfg(test)]
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
