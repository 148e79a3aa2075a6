//! Grace windows for dropped identities: resynchronisation on return, host-drop
//! pausing and departure handling once a window lapses.

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{PlayerDisconnectedEvent, PlayerReconnectedEvent},
        ws::server_events,
    },
    error::ServiceError,
    services::{
        Caller, events,
        session_service::{self, drop_player_locked, host_rooms, player_rooms},
    },
    state::{
        SharedState,
        connections::Departure,
        registry::SessionRuntime,
        session::SessionStatus,
        timers::TimerKey,
    },
};

fn grace_key(session_id: Uuid, player_id: &str) -> TimerKey {
    TimerKey::Grace {
        session_id,
        player_id: player_id.to_string(),
    }
}

/// Resume the caller inside an open grace window. Returns `false` when there is
/// no window or it already lapsed, in which case the caller joins afresh.
pub async fn try_resume(
    state: &SharedState,
    runtime: &mut SessionRuntime,
    caller: &Caller,
) -> Result<bool, ServiceError> {
    let session_id = runtime.session.id;
    let identity = caller.identity.as_str();
    let Some(window) = state
        .reconnections()
        .get(session_id, identity)
        .filter(|window| Instant::now() < window.expires_at)
    else {
        return Ok(false);
    };

    if !window.is_host {
        let Some(player) = runtime.session.players.get(identity) else {
            return Ok(false);
        };
        if !player.active {
            let store = state.require_game_store().await?;
            let mut draft = runtime.session.clone();
            if let Some(player) = draft.players.get_mut(identity) {
                player.active = true;
            }
            runtime.commit(&store, draft).await?;
        }
    }

    // The window closes only once the player is back in a consistent state.
    if state
        .reconnections()
        .take_epoch(session_id, identity, window.epoch)
        .is_none()
    {
        return Ok(false);
    }
    state.timers().cancel(&grace_key(session_id, identity));

    let code = runtime.session.code.clone();
    if window.is_host {
        state
            .connections()
            .enter_session(caller.connection_id, &code, &host_rooms(&code));
    } else {
        state.connections().enter_session(
            caller.connection_id,
            &code,
            &player_rooms(&code, identity),
        );
    }

    events::send_state(state, caller.connection_id, runtime);
    events::to_session(
        state,
        &code,
        server_events::PLAYER_RECONNECTED,
        &PlayerReconnectedEvent {
            player_id: identity.to_string(),
            is_host: window.is_host,
        },
    );
    info!(code = %code, player_id = identity, is_host = window.is_host, "reconnected within grace");
    Ok(true)
}

/// Close any window of `identity`, lapsed or not. Returns whether one existed.
pub fn discard_window(state: &SharedState, session_id: Uuid, identity: &str) -> bool {
    let Some(window) = state.reconnections().get(session_id, identity) else {
        return false;
    };
    state
        .reconnections()
        .take_epoch(session_id, identity, window.epoch);
    state.timers().cancel(&grace_key(session_id, identity));
    true
}

/// Socket teardown: open a grace window when the identity has no other
/// connection left in its session, pausing the game if the host dropped.
pub async fn on_disconnect(state: &SharedState, departure: Departure) {
    let (Some(identity), Some(code)) = (departure.identity, departure.session_code) else {
        return;
    };
    let Some(handle) = state.sessions().get(&code) else {
        return;
    };
    // Presence is judged under the session lock so a tab joining meanwhile is seen.
    let Ok(mut runtime) = handle.lock_open().await else {
        return;
    };
    if state.connections().present_in_session(&identity, &code) {
        debug!(code = %code, identity = %identity, "identity still connected elsewhere");
        return;
    }
    if runtime.session.status == SessionStatus::Completed {
        return;
    }
    let is_host = runtime.session.is_host(&identity);
    if !is_host && !runtime.session.players.contains_key(&identity) {
        return;
    }

    if is_host && runtime.session.status == SessionStatus::Active {
        if let Err(err) =
            session_service::pause_locked(state, &mut runtime, "host disconnected".into()).await
        {
            warn!(code = %code, error = %err, "failed to pause after host disconnect");
        }
    }

    let session_id = runtime.session.id;
    let window = state.reconnections().open(
        session_id,
        &code,
        &identity,
        is_host,
        departure.connection_id,
        Instant::now(),
    );
    let grace = state.reconnections().grace();

    let shared = state.clone();
    let player_id = identity.clone();
    let epoch = window.epoch;
    state
        .timers()
        .schedule(grace_key(session_id, &identity), grace, move || async move {
            on_grace_expired(shared, session_id, player_id, epoch).await;
        });

    events::to_session(
        state,
        &code,
        server_events::PLAYER_DISCONNECTED,
        &PlayerDisconnectedEvent {
            player_id: identity.clone(),
            is_host,
            grace_seconds: grace.as_secs(),
        },
    );
    info!(
        code = %code,
        player_id = %identity,
        is_host,
        grace_secs = grace.as_secs(),
        "grace window opened"
    );
}

/// Grace timer callback. Only the window identified by `epoch` is acted upon.
pub async fn on_grace_expired(state: SharedState, session_id: Uuid, player_id: String, epoch: u64) {
    let Some(window) = state
        .reconnections()
        .take_epoch(session_id, &player_id, epoch)
    else {
        debug!(%session_id, player_id = %player_id, epoch, "grace window already closed");
        return;
    };
    if window.is_host {
        info!(
            code = %window.session_code,
            "host grace expired; the session waits for the host to rejoin"
        );
        return;
    }

    let Some(handle) = state.sessions().get_by_id(session_id) else {
        return;
    };
    let Ok(mut runtime) = handle.lock_open().await else {
        return;
    };
    let present = runtime
        .session
        .players
        .get(&player_id)
        .is_some_and(|player| player.active);
    if runtime.session.status == SessionStatus::Completed || !present {
        return;
    }
    if state
        .connections()
        .present_in_session(&player_id, &runtime.session.code)
    {
        debug!(%session_id, player_id = %player_id, "player came back on another connection");
        return;
    }
    if let Err(err) = drop_player_locked(&state, &mut runtime, &player_id, "disconnected").await {
        warn!(%session_id, player_id = %player_id, error = %err, "failed to drop expired player");
    }
}
