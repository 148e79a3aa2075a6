//! Live connections, the identities behind them and the rooms they listen to.

use std::{collections::HashSet, fmt};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one socket.
pub type ConnectionId = Uuid;

/// Broadcast group keyed by session join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Host and players.
    Session(String),
    /// Host only.
    Host(String),
    /// Direct messages to one player.
    Player(String, String),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Session(code) => write!(f, "{code}"),
            Room::Host(code) => write!(f, "{code}:host"),
            Room::Player(code, player_id) => write!(f, "{code}:player:{player_id}"),
        }
    }
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<Message>,
    identity: Option<String>,
    session_code: Option<String>,
    rooms: HashSet<Room>,
}

/// What remains to be handled after a socket goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Socket that went away.
    pub connection_id: ConnectionId,
    /// Identity it was bound to, if it ever identified.
    pub identity: Option<String>,
    /// Session it had joined, if any.
    pub session_code: Option<String>,
    /// Other live connections of the same identity.
    pub remaining_connections: usize,
}

/// Registry of sockets. Several connections may share one identity.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    identities: DashMap<String, HashSet<ConnectionId>>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new socket and hand back its id.
    pub fn register(&self, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                tx,
                identity: None,
                session_code: None,
                rooms: HashSet::new(),
            },
        );
        id
    }

    /// Bind a persistent identity to a connection.
    pub fn identify(&self, connection_id: ConnectionId, identity: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.identity = Some(identity.to_string());
        drop(entry);

        self.identities
            .entry(identity.to_string())
            .or_default()
            .insert(connection_id);
        true
    }

    /// Join code of the session the connection last joined.
    pub fn session_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.connections
            .get(&connection_id)
            .and_then(|entry| entry.session_code.clone())
    }

    /// Every live connection bound to `identity`.
    pub fn connections_of(&self, identity: &str) -> Vec<ConnectionId> {
        self.identities
            .get(identity)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any connection of `identity` is attached to session `code`.
    pub fn present_in_session(&self, identity: &str, code: &str) -> bool {
        self.connections_of(identity).into_iter().any(|connection_id| {
            self.session_of(connection_id).as_deref() == Some(code)
        })
    }

    /// Attach a connection to a session and subscribe it to `rooms`.
    pub fn enter_session(&self, connection_id: ConnectionId, code: &str, rooms: &[Room]) {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return;
        };
        entry.session_code = Some(code.to_string());
        entry.rooms.extend(rooms.iter().cloned());
        drop(entry);

        for room in rooms {
            self.rooms
                .entry(room.clone())
                .or_default()
                .insert(connection_id);
        }
    }

    /// Drop every room of `code` from the connection.
    pub fn exit_session(&self, connection_id: ConnectionId, code: &str) {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return;
        };
        let rooms: Vec<Room> = entry
            .rooms
            .iter()
            .filter(|room| room_code(room) == code)
            .cloned()
            .collect();
        for room in &rooms {
            entry.rooms.remove(room);
        }
        if entry.session_code.as_deref() == Some(code) {
            entry.session_code = None;
        }
        drop(entry);

        for room in rooms {
            self.leave_room(connection_id, &room);
        }
    }

    /// Detach every connection from a torn-down session. Returns how many were attached.
    pub fn release_session(&self, code: &str) -> usize {
        let attached: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| {
                entry.session_code.as_deref() == Some(code)
                    || entry.rooms.iter().any(|room| room_code(room) == code)
            })
            .map(|entry| *entry.key())
            .collect();
        for connection_id in &attached {
            self.exit_session(*connection_id, code);
        }
        attached.len()
    }

    /// Forget a connection. Returns what the caller needs for disconnect handling.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Departure> {
        let (_, entry) = self.connections.remove(&connection_id)?;
        for room in &entry.rooms {
            self.leave_room(connection_id, room);
        }

        let remaining_connections = match entry.identity.as_deref() {
            Some(identity) => {
                let remaining = self.identities.get_mut(identity).map(|mut ids| {
                    ids.remove(&connection_id);
                    ids.len()
                });
                self.identities.remove_if(identity, |_, ids| ids.is_empty());
                remaining.unwrap_or(0)
            }
            None => 0,
        };

        Some(Departure {
            connection_id,
            identity: entry.identity,
            session_code: entry.session_code,
            remaining_connections,
        })
    }

    /// Push a text frame to one connection.
    pub fn send(&self, connection_id: ConnectionId, payload: &str) -> bool {
        let Some(tx) = self
            .connections
            .get(&connection_id)
            .map(|entry| entry.tx.clone())
        else {
            return false;
        };
        tx.send(Message::Text(payload.to_owned().into())).is_ok()
    }

    /// Push a text frame to every member of `room`. Returns the number of deliveries.
    pub fn broadcast(&self, room: &Room, payload: &str) -> usize {
        let members: Vec<ConnectionId> = self
            .rooms
            .get(room)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        members
            .into_iter()
            .filter(|connection_id| self.send(*connection_id, payload))
            .count()
    }

    #[cfg(test)]
    pub fn room_size(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Number of open sockets.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    fn leave_room(&self, connection_id: ConnectionId, room: &Room) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}

fn room_code(room: &Room) -> &str {
    match room {
        Room::Session(code) | Room::Host(code) | Room::Player(code, _) => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.register(tx), rx)
    }

    #[test]
    fn room_names_follow_the_channel_layout() {
        assert_eq!(Room::Session("AB12".into()).to_string(), "AB12");
        assert_eq!(Room::Host("AB12".into()).to_string(), "AB12:host");
        assert_eq!(
            Room::Player("AB12".into(), "p1".into()).to_string(),
            "AB12:player:p1"
        );
    }

    #[test]
    fn one_identity_can_hold_several_connections() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connect(&registry);
        let (second, _rx2) = connect(&registry);
        registry.identify(first, "alice");
        registry.identify(second, "alice");
        assert_eq!(registry.connections_of("alice").len(), 2);

        registry.enter_session(second, "AB12", &[Room::Session("AB12".into())]);
        assert!(registry.present_in_session("alice", "AB12"));
        assert!(!registry.present_in_session("alice", "CD34"));

        let departure = registry.unregister(first).unwrap();
        assert_eq!(departure.remaining_connections, 1);
        assert!(registry.present_in_session("alice", "AB12"));

        let departure = registry.unregister(second).unwrap();
        assert_eq!(departure.remaining_connections, 0);
        assert!(!registry.present_in_session("alice", "AB12"));
        assert!(registry.connections_of("alice").is_empty());
    }

    #[test]
    fn broadcast_reaches_only_room_members() {
        let registry = ConnectionRegistry::new();
        let (host, mut host_rx) = connect(&registry);
        let (player, mut player_rx) = connect(&registry);
        registry.enter_session(
            host,
            "AB12",
            &[Room::Session("AB12".into()), Room::Host("AB12".into())],
        );
        registry.enter_session(player, "AB12", &[Room::Session("AB12".into())]);

        assert_eq!(registry.broadcast(&Room::Host("AB12".into()), "hi host"), 1);
        assert_eq!(registry.broadcast(&Room::Session("AB12".into()), "hi all"), 2);

        assert!(matches!(host_rx.try_recv(), Ok(Message::Text(text)) if text.as_str() == "hi host"));
        assert!(matches!(player_rx.try_recv(), Ok(Message::Text(text)) if text.as_str() == "hi all"));

        registry.exit_session(player, "AB12");
        assert_eq!(registry.room_size(&Room::Session("AB12".into())), 1);
        assert_eq!(registry.session_of(player), None);
    }

    #[test]
    fn released_sessions_leave_no_rooms_behind() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connect(&registry);
        let (second, _rx2) = connect(&registry);
        for connection_id in [first, second] {
            registry.enter_session(
                connection_id,
                "AB12",
                &[Room::Session("AB12".into()), Room::Player("AB12".into(), "p".into())],
            );
        }

        assert_eq!(registry.release_session("AB12"), 2);
        assert_eq!(registry.room_size(&Room::Session("AB12".into())), 0);
        assert_eq!(registry.session_of(first), None);
        assert_eq!(registry.active_connections(), 2);
    }
}
