//! Outbound event delivery: encoding, room broadcasts and direct sends.

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{ErrorEvent, GameStateSnapshot},
        format_system_time,
        ws::{OutboundEnvelope, server_events},
    },
    error::ServiceError,
    state::{SharedState, connections::ConnectionId, connections::Room, registry::SessionRuntime},
};

/// Serialize an event frame. A failure here is a bug, so it is logged and dropped.
pub fn encode<T>(event: &str, data: &T) -> Option<String>
where
    T: Serialize + std::fmt::Debug,
{
    match serde_json::to_string(&OutboundEnvelope { event, data }) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize outbound event `{data:?}`");
            None
        }
    }
}

/// Broadcast an event to every member of `room`.
pub fn to_room<T>(state: &SharedState, room: &Room, event: &str, data: &T) -> usize
where
    T: Serialize + std::fmt::Debug,
{
    let Some(payload) = encode(event, data) else {
        return 0;
    };
    let delivered = state.connections().broadcast(room, &payload);
    state.metrics().messages_sent(delivered);
    debug!(%room, event, delivered, "broadcast event");
    delivered
}

/// Send an event to a single connection.
pub fn to_connection<T>(state: &SharedState, connection_id: ConnectionId, event: &str, data: &T) -> bool
where
    T: Serialize + std::fmt::Debug,
{
    let Some(payload) = encode(event, data) else {
        return false;
    };
    let delivered = state.connections().send(connection_id, &payload);
    if delivered {
        state.metrics().messages_sent(1);
    } else {
        debug!(%connection_id, event, "connection gone before delivery");
    }
    delivered
}

/// Broadcast to the session room. Returns the number of sockets reached.
pub fn to_session<T>(state: &SharedState, code: &str, event: &str, data: &T) -> usize
where
    T: Serialize + std::fmt::Debug,
{
    to_room(state, &Room::Session(code.to_string()), event, data)
}

/// Send to the host room of a session.
pub fn to_host<T>(state: &SharedState, code: &str, event: &str, data: &T) -> usize
where
    T: Serialize + std::fmt::Debug,
{
    to_room(state, &Room::Host(code.to_string()), event, data)
}

/// Send to every connection of one player in the session.
pub fn to_player<T>(state: &SharedState, code: &str, player_id: &str, event: &str, data: &T) -> usize
where
    T: Serialize + std::fmt::Debug,
{
    to_room(
        state,
        &Room::Player(code.to_string(), player_id.to_string()),
        event,
        data,
    )
}

/// Push the current `game:state` snapshot to the whole session.
pub fn broadcast_state(state: &SharedState, runtime: &SessionRuntime) {
    let snapshot = GameStateSnapshot::from_runtime(runtime, Instant::now());
    to_session(state, &runtime.session.code, server_events::GAME_STATE, &snapshot);
}

/// Send the current `game:state` snapshot to one connection.
pub fn send_state(state: &SharedState, connection_id: ConnectionId, runtime: &SessionRuntime) {
    let snapshot = GameStateSnapshot::from_runtime(runtime, Instant::now());
    to_connection(state, connection_id, server_events::GAME_STATE, &snapshot);
}

/// Lifecycle side effects: snapshot to the room and the transition counter.
pub fn transition_applied(state: &SharedState, runtime: &SessionRuntime) {
    state.metrics().transition(runtime.session.id);
    broadcast_state(state, runtime);
}

/// Translate a failed handler into the `error` event sent back to its connection.
pub fn report_error(
    state: &SharedState,
    connection_id: ConnectionId,
    err: &ServiceError,
    session_id: Option<Uuid>,
) {
    let code = err.code();
    state.metrics().error(code, session_id);
    match err {
        ServiceError::Unavailable(_) | ServiceError::Internal(_) => {
            warn!(%connection_id, code, error = %err, "event handling failed");
        }
        _ => debug!(%connection_id, code, error = %err, "event rejected"),
    }

    let event = ErrorEvent {
        code: code.to_string(),
        message: err.to_string(),
        timestamp: format_system_time(std::time::SystemTime::now()),
        retry_after: err.retry_after(),
        details: state
            .config()
            .expose_error_details
            .then(|| format!("{err:?}")),
    };
    to_connection(state, connection_id, server_events::ERROR, &event);
}
