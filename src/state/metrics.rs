//! Process-wide and per-session counters.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use crate::dto::metrics::{GlobalMetrics, MetricsSnapshot, SessionMetrics};

#[derive(Debug, Default, Clone)]
struct SessionCounters {
    code: String,
    messages: u64,
    answers: u64,
    buzzes: u64,
    errors: u64,
    transitions: u64,
}

/// Lock-free counters shared by every handler.
#[derive(Default)]
pub struct Monitoring {
    connections_opened: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    errors: AtomicU64,
    rate_limited: AtomicU64,
    sessions_created: AtomicU64,
    sessions_completed: AtomicU64,
    errors_by_code: DashMap<&'static str, u64>,
    sessions: DashMap<Uuid, SessionCounters>,
}

impl Monitoring {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted socket.
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an inbound frame, per session when known.
    pub fn message_received(&self, session_id: Option<Uuid>) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        if let Some(id) = session_id {
            self.with_session(id, |counters| counters.messages += 1);
        }
    }

    /// Count outbound frames.
    pub fn messages_sent(&self, count: usize) {
        self.messages_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Count an error event by code.
    pub fn error(&self, code: &'static str, session_id: Option<Uuid>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.errors_by_code.entry(code).or_default() += 1;
        if code == crate::error::codes::RATE_LIMIT_EXCEEDED {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(id) = session_id {
            self.with_session(id, |counters| counters.errors += 1);
        }
    }

    /// Start tracking a session.
    pub fn session_created(&self, session_id: Uuid, code: &str) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            session_id,
            SessionCounters {
                code: code.to_string(),
                ..SessionCounters::default()
            },
        );
    }

    /// Track a session brought back from the store without counting it as new.
    pub fn session_loaded(&self, session_id: Uuid, code: &str) {
        self.sessions.entry(session_id).or_insert_with(|| SessionCounters {
            code: code.to_string(),
            ..SessionCounters::default()
        });
    }

    /// Stop tracking a session once it is torn down.
    pub fn session_closed(&self, session_id: Uuid, completed: bool) {
        if completed {
            self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        }
        self.sessions.remove(&session_id);
    }

    /// Count an answer in the session.
    pub fn answer_recorded(&self, session_id: Uuid) {
        self.with_session(session_id, |counters| counters.answers += 1);
    }

    /// Count a buzz-in in the session.
    pub fn buzz_recorded(&self, session_id: Uuid) {
        self.with_session(session_id, |counters| counters.buzzes += 1);
    }

    /// Count a lifecycle transition in the session.
    pub fn transition(&self, session_id: Uuid) {
        self.with_session(session_id, |counters| counters.transitions += 1);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self, active_connections: usize) -> MetricsSnapshot {
        let mut errors_by_code: Vec<(String, u64)> = self
            .errors_by_code
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        errors_by_code.sort();

        let mut sessions: Vec<SessionMetrics> = self
            .sessions
            .iter()
            .map(|entry| {
                let counters = entry.value();
                SessionMetrics {
                    session_id: *entry.key(),
                    code: counters.code.clone(),
                    messages: counters.messages,
                    answers: counters.answers,
                    buzzes: counters.buzzes,
                    errors: counters.errors,
                    transitions: counters.transitions,
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.code.cmp(&b.code));

        MetricsSnapshot {
            global: GlobalMetrics {
                connections_opened: self.connections_opened.load(Ordering::Relaxed),
                active_connections: active_connections as u64,
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                errors: self.errors.load(Ordering::Relaxed),
                rate_limited: self.rate_limited.load(Ordering::Relaxed),
                sessions_created: self.sessions_created.load(Ordering::Relaxed),
                sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
                errors_by_code: errors_by_code.into_iter().collect(),
            },
            sessions,
        }
    }

    fn with_session(&self, session_id: Uuid, update: impl FnOnce(&mut SessionCounters)) {
        if let Some(mut counters) = self.sessions.get_mut(&session_id) {
            update(&mut counters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn counters_are_split_between_global_and_session() {
        let monitoring = Monitoring::new();
        let session = Uuid::new_v4();
        monitoring.session_created(session, "ABC123");
        monitoring.message_received(Some(session));
        monitoring.message_received(None);
        monitoring.error(codes::RATE_LIMIT_EXCEEDED, Some(session));
        monitoring.answer_recorded(session);

        let snapshot = monitoring.snapshot(2);
        assert_eq!(snapshot.global.messages_received, 2);
        assert_eq!(snapshot.global.rate_limited, 1);
        assert_eq!(snapshot.global.errors_by_code.get(codes::RATE_LIMIT_EXCEEDED), Some(&1));
        assert_eq!(snapshot.sessions[0].messages, 1);
        assert_eq!(snapshot.sessions[0].answers, 1);

        monitoring.session_closed(session, true);
        let snapshot = monitoring.snapshot(0);
        assert!(snapshot.sessions.is_empty());
        assert_eq!(snapshot.global.sessions_completed, 1);
    }
}
