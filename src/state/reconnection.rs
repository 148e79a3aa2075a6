use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::state::connections::ConnectionId;

/// Pending grace window for an identity that lost its last connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionEntry {
    /// Dropped identity.
    pub player_id: String,
    /// Session it belongs to.
    pub session_id: Uuid,
    /// Join code of that session.
    pub session_code: String,
    /// Wall-clock time of the drop.
    pub disconnected_at: SystemTime,
    /// End of the grace window.
    pub expires_at: Instant,
    /// Whether the identity hosts the session.
    pub is_host: bool,
    /// Connection that dropped.
    pub connection_id: ConnectionId,
    /// Distinguishes successive windows of the same identity.
    pub epoch: u64,
}

/// Process-local store of open grace windows.
pub struct ReconnectionManager {
    grace: Duration,
    entries: DashMap<(Uuid, String), ReconnectionEntry>,
    next_epoch: AtomicU64,
}

impl ReconnectionManager {
    /// Manager granting `grace` to every dropped identity.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            entries: DashMap::new(),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Length of a grace window.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Open a window, replacing any previous one for the same identity.
    pub fn open(
        &self,
        session_id: Uuid,
        session_code: &str,
        player_id: &str,
        is_host: bool,
        connection_id: ConnectionId,
        now: Instant,
    ) -> ReconnectionEntry {
        let entry = ReconnectionEntry {
            player_id: player_id.to_string(),
            session_id,
            session_code: session_code.to_string(),
            disconnected_at: SystemTime::now(),
            expires_at: now + self.grace,
            is_host,
            connection_id,
            epoch: self.next_epoch.fetch_add(1, Ordering::Relaxed),
        };
        self.entries
            .insert((session_id, player_id.to_string()), entry.clone());
        entry
    }

    /// Close the window only if it is the one identified by `epoch`.
    pub fn take_epoch(&self, session_id: Uuid, player_id: &str, epoch: u64) -> Option<ReconnectionEntry> {
        self.entries
            .remove_if(&(session_id, player_id.to_string()), |_, entry| {
                entry.epoch == epoch
            })
            .map(|(_, entry)| entry)
    }

    /// Open window of `player_id` in the session, if any.
    pub fn get(&self, session_id: Uuid, player_id: &str) -> Option<ReconnectionEntry> {
        self.entries
            .get(&(session_id, player_id.to_string()))
            .map(|entry| entry.clone())
    }

    /// Drop every window of a session.
    pub fn forget_session(&self, session_id: Uuid) {
        self.entries.retain(|(id, _), _| *id != session_id);
    }

    /// Number of open windows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no window is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
