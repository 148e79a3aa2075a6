use std::{sync::Arc, time::SystemTime};

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        game_store::GameStore,
        models::{GameHistoryEntity, StandingEntity},
        storage::StorageError,
    },
    dto::{
        events::{
            GameEndedEvent, GamePausedEvent, GameResumedEvent, GameStartedEvent,
            GameStateSnapshot, PlayerJoinedEvent, PlayerLeftEvent, duration_ms,
        },
        format_system_time,
        session::{CreateSessionRequest, SessionCreated},
        validation::{JOIN_CODE_ALPHABET, JOIN_CODE_LENGTH},
        ws::server_events,
    },
    error::ServiceError,
    services::{Caller, events, question_service, reconnection_service, round_service},
    state::{
        SharedState,
        connections::Room,
        registry::{SessionHandle, SessionRuntime},
        session::{GameSession, PlayerEntry, SessionStatus},
        state_machine::SessionEvent,
        timers::TimerKey,
    },
};

const JOIN_CODE_ATTEMPTS: usize = 8;

/// Random join code drawn from the unambiguous alphabet.
pub fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Open a session in `created` status and register its runtime.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionCreated, ServiceError> {
    let store = state.require_game_store().await?;
    let settings = request.session_settings();

    let mut created = None;
    for attempt in 0..JOIN_CODE_ATTEMPTS {
        let session = GameSession::new(
            generate_join_code(),
            request.host_id.clone(),
            settings.clone(),
            SystemTime::now(),
        );
        match store.create_session(session.clone().into()).await {
            Ok(()) => {
                created = Some(session);
                break;
            }
            Err(StorageError::Duplicate(key)) => {
                debug!(attempt, %key, "join code collision; drawing another");
            }
            Err(err) => return Err(err.into()),
        }
    }
    let session = created.ok_or_else(|| {
        ServiceError::Internal("could not allocate a unique join code".into())
    })?;

    let response = SessionCreated {
        session_id: session.id,
        code: session.code.clone(),
        host_id: session.host_id.clone(),
        settings: session.settings.clone(),
    };
    state.metrics().session_created(session.id, &session.code);
    state.sessions().insert(SessionRuntime::new(session));
    info!(
        session_id = %response.session_id,
        code = %response.code,
        host_id = %response.host_id,
        "session created"
    );
    Ok(response)
}

/// Live handle for `code`, loading the session from the store when needed.
pub async fn load_handle(
    state: &SharedState,
    code: &str,
) -> Result<Arc<SessionHandle>, ServiceError> {
    if let Some(handle) = state.sessions().get(code) {
        return Ok(handle);
    }

    let store = state.require_game_store().await?;
    let entity = store
        .find_session_by_code(code.to_string())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{code}` not found")))?;
    if entity.status == SessionStatus::Completed {
        return Err(ServiceError::InvalidState(format!(
            "session `{code}` has already ended"
        )));
    }

    let session = GameSession::from(entity);
    state.metrics().session_loaded(session.id, &session.code);
    info!(session_id = %session.id, code, status = ?session.status, "session loaded from store");
    Ok(state.sessions().insert(SessionRuntime::new(session)))
}

/// Session the caller's connection joined.
pub async fn caller_session(
    state: &SharedState,
    caller: &Caller,
) -> Result<Arc<SessionHandle>, ServiceError> {
    let code = state
        .connections()
        .session_of(caller.connection_id)
        .ok_or_else(|| ServiceError::InvalidState("join a session first".into()))?;
    load_handle(state, &code).await
}

/// Refuse callers other than the session host.
pub fn ensure_host(session: &GameSession, caller: &Caller) -> Result<(), ServiceError> {
    if session.is_host(&caller.identity) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(format!(
            "`{}` is not the host of session `{}`",
            caller.identity, session.code
        )))
    }
}

/// Rooms a host connection joins.
pub fn host_rooms(code: &str) -> [Room; 2] {
    [Room::Session(code.to_string()), Room::Host(code.to_string())]
}

/// Rooms a player connection joins.
pub fn player_rooms(code: &str, player_id: &str) -> [Room; 2] {
    [
        Room::Session(code.to_string()),
        Room::Player(code.to_string(), player_id.to_string()),
    ]
}

/// Public snapshot of the session behind `code`.
pub async fn snapshot(state: &SharedState, code: &str) -> Result<GameStateSnapshot, ServiceError> {
    let handle = load_handle(state, code).await?;
    let runtime = handle.lock_open().await?;
    Ok(GameStateSnapshot::from_runtime(&runtime, Instant::now()))
}

/// Handle `game:join`: resume within a grace window, restore rooms for an
/// extra tab, or add the caller as a (re)joining player.
pub async fn join(state: &SharedState, caller: &Caller, code: &str) -> Result<(), ServiceError> {
    if let Some(current) = state.connections().session_of(caller.connection_id) {
        if current != code {
            return Err(ServiceError::InvalidState(format!(
                "connection already joined session `{current}`; leave it first"
            )));
        }
    }

    let handle = load_handle(state, code).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;

    if runtime.session.status == SessionStatus::Completed {
        return Err(ServiceError::InvalidState(format!(
            "session `{code}` has already ended"
        )));
    }

    if reconnection_service::try_resume(state, &mut runtime, caller).await? {
        return Ok(());
    }
    // An expired window is dropped; the caller comes back as a fresh joiner.
    let stale_window =
        reconnection_service::discard_window(state, runtime.session.id, &caller.identity);

    if runtime.session.is_host(&caller.identity) {
        state
            .connections()
            .enter_session(caller.connection_id, code, &host_rooms(code));
        events::send_state(state, caller.connection_id, &runtime);
        info!(code, host_id = %caller.identity, "host attached to session");
        return Ok(());
    }

    let player_id = caller.identity.as_str();
    let mut transitioned = false;
    match runtime.session.players.get(player_id) {
        Some(player) if player.active && !stale_window => {
            state.connections().enter_session(
                caller.connection_id,
                code,
                &player_rooms(code, player_id),
            );
            events::send_state(state, caller.connection_id, &runtime);
            debug!(code, player_id, "additional connection for active player");
            return Ok(());
        }
        Some(_) => {
            let mut draft = runtime.session.clone();
            if let Some(player) = draft.players.get_mut(player_id) {
                player.active = true;
                player.ready = false;
            }
            runtime.commit(&store, draft).await?;
        }
        None => {
            let session = &runtime.session;
            if session.status.has_started() && !session.settings.allow_join_after_start {
                return Err(ServiceError::InvalidState(format!(
                    "session `{code}` does not accept players once started"
                )));
            }
            if session.players.len() >= session.settings.max_players as usize {
                return Err(ServiceError::InvalidState(format!(
                    "session `{code}` is full"
                )));
            }

            let profile = store.find_player(player_id.to_string()).await?;
            let (name, subject) = match profile {
                Some(profile) => (profile.name, profile.specialist_subject),
                None => (player_id.to_string(), None),
            };
            let entry = PlayerEntry::new(player_id.to_string(), name, subject, SystemTime::now());

            if runtime.session.status == SessionStatus::Created {
                runtime
                    .run_transition(&store, SessionEvent::PlayerJoined, |draft| {
                        draft.players.insert(entry.player_id.clone(), entry);
                        draft.recompute_positions();
                        Ok(())
                    })
                    .await?;
                transitioned = true;
            } else {
                let mut draft = runtime.session.clone();
                draft.players.insert(entry.player_id.clone(), entry);
                draft.recompute_positions();
                runtime.commit(&store, draft).await?;
            }
        }
    }

    state
        .connections()
        .enter_session(caller.connection_id, code, &player_rooms(code, player_id));

    let (name, player_count) = {
        let session = &runtime.session;
        let name = session
            .players
            .get(player_id)
            .map(|player| player.name.clone())
            .unwrap_or_else(|| player_id.to_string());
        (name, session.active_player_count())
    };
    events::to_session(
        state,
        code,
        server_events::PLAYER_JOINED,
        &PlayerJoinedEvent {
            player_id: player_id.to_string(),
            name,
            player_count,
        },
    );
    if transitioned {
        events::transition_applied(state, &runtime);
    } else {
        events::send_state(state, caller.connection_id, &runtime);
    }
    info!(code, player_id, player_count, "player joined");
    Ok(())
}

/// Handle `game:leave` for every connection of the caller's identity.
pub async fn leave(state: &SharedState, caller: &Caller) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let code = handle.code.clone();
    let mut runtime = handle.lock_open().await?;

    for connection_id in state.connections().connections_of(&caller.identity) {
        if state.connections().session_of(connection_id).as_deref() == Some(code.as_str()) {
            state.connections().exit_session(connection_id, &code);
        }
    }
    reconnection_service::discard_window(state, runtime.session.id, &caller.identity);

    if runtime.session.is_host(&caller.identity) {
        info!(code = %code, "host left the session rooms");
        return Ok(());
    }
    if !runtime.session.players.contains_key(&caller.identity) {
        return Ok(());
    }
    drop_player_locked(state, &mut runtime, &caller.identity, "left").await
}

/// Remove a player from a session that never started, or mark them inactive
/// once it has. The last player leaving a never-started session destroys it.
pub async fn drop_player_locked(
    state: &SharedState,
    runtime: &mut SessionRuntime,
    player_id: &str,
    reason: &str,
) -> Result<(), ServiceError> {
    let store = state.require_game_store().await?;
    let mut draft = runtime.session.clone();
    let started = draft.status.has_started();
    if started {
        if let Some(player) = draft.players.get_mut(player_id) {
            player.active = false;
            player.ready = false;
        }
    } else {
        draft.players.shift_remove(player_id);
        draft.recompute_positions();
    }
    let now_empty = !started && draft.players.is_empty();
    runtime.commit(&store, draft).await?;

    let code = runtime.session.code.clone();
    events::to_session(
        state,
        &code,
        server_events::PLAYER_LEFT,
        &PlayerLeftEvent {
            player_id: player_id.to_string(),
            reason: reason.to_string(),
        },
    );
    info!(code = %code, player_id, reason, "player left");

    if now_empty {
        destroy_session_locked(state, runtime, &store).await;
    } else {
        events::broadcast_state(state, runtime);
    }
    Ok(())
}

async fn destroy_session_locked(
    state: &SharedState,
    runtime: &mut SessionRuntime,
    store: &Arc<dyn GameStore>,
) {
    let session_id = runtime.session.id;
    if let Err(err) = store.delete_session(session_id).await {
        warn!(%session_id, error = %err, "failed to delete abandoned session");
    }
    teardown(state, runtime, false);
    info!(%session_id, code = %runtime.session.code, "abandoned session destroyed");
}

/// Drop every in-process resource of a session.
pub fn teardown(state: &SharedState, runtime: &mut SessionRuntime, completed: bool) {
    runtime.close();
    let session_id = runtime.session.id;
    let code = runtime.session.code.as_str();
    state.timers().cancel_session(session_id);
    state.reconnections().forget_session(session_id);
    state.sessions().remove(code, session_id);
    state.connections().release_session(code);
    state.metrics().session_closed(session_id, completed);
}

/// Toggle the caller's ready flag.
pub async fn toggle_ready(state: &SharedState, caller: &Caller) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;

    if runtime.session.status == SessionStatus::Completed {
        return Err(ServiceError::InvalidState("session has already ended".into()));
    }
    let mut draft = runtime.session.clone();
    let player = draft.players.get_mut(&caller.identity).ok_or_else(|| {
        ServiceError::NotFound(format!("player `{}` is not in this session", caller.identity))
    })?;
    player.ready = !player.ready;
    let ready = player.ready;
    runtime.commit(&store, draft).await?;

    debug!(code = %handle.code, player_id = %caller.identity, ready, "ready toggled");
    events::broadcast_state(state, &runtime);
    Ok(())
}

/// Handle `game:start` from the host.
pub async fn start_game(state: &SharedState, caller: &Caller) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;

    if runtime.session.status == SessionStatus::Lobby && runtime.session.active_player_count() == 0
    {
        return Err(ServiceError::InvalidState(
            "at least one active player is required to start".into(),
        ));
    }

    let now = SystemTime::now();
    runtime
        .run_transition(&store, SessionEvent::Start, |draft| {
            draft.started_at = Some(now);
            draft.paused_at = None;
            draft.recompute_positions();
            Ok(())
        })
        .await?;

    let player_count = runtime.session.active_player_count();
    events::to_session(
        state,
        &handle.code,
        server_events::GAME_STARTED,
        &GameStartedEvent {
            started_at: format_system_time(now),
            player_count,
        },
    );
    events::transition_applied(state, &runtime);
    info!(code = %handle.code, player_count, "game started");
    Ok(())
}

/// Handle `game:pause` from the host.
pub async fn pause_game(
    state: &SharedState,
    caller: &Caller,
    reason: Option<String>,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;
    pause_locked(state, &mut runtime, reason.unwrap_or_else(|| "paused by host".into())).await?;
    Ok(())
}

/// Pause the game and freeze the question and round clocks.
pub async fn pause_locked(
    state: &SharedState,
    runtime: &mut SessionRuntime,
    reason: String,
) -> Result<GamePausedEvent, ServiceError> {
    let store = state.require_game_store().await?;
    let now = SystemTime::now();
    runtime
        .run_transition(&store, SessionEvent::Pause(reason.clone()), |draft| {
            draft.paused_at = Some(now);
            Ok(())
        })
        .await?;

    let session_id = runtime.session.id;
    let instant = Instant::now();
    let remaining = runtime
        .live_question
        .as_mut()
        .map(|live| live.countdown.pause(instant));
    state.timers().cancel(&TimerKey::Question(session_id));
    if let Some(clock) = runtime.round_clock.as_mut() {
        clock.countdown.pause(instant);
    }
    state.timers().cancel(&TimerKey::Round(session_id));

    let event = GamePausedEvent {
        reason,
        paused_at: format_system_time(now),
        remaining_ms: remaining.map(duration_ms),
    };
    events::to_session(state, &runtime.session.code, server_events::GAME_PAUSED, &event);
    events::transition_applied(state, runtime);
    info!(code = %runtime.session.code, reason = %event.reason, "game paused");
    Ok(event)
}

/// Resume a paused game, re-arming clocks with their frozen remaining time.
pub async fn resume_game(state: &SharedState, caller: &Caller) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;

    runtime
        .run_transition(&store, SessionEvent::Resume, |draft| {
            draft.paused_at = None;
            Ok(())
        })
        .await?;

    let session_id = runtime.session.id;
    let instant = Instant::now();
    let remaining = match runtime.live_question.as_mut() {
        Some(live) => {
            let remaining = live.countdown.resume(instant);
            question_service::arm_question_timer(state, session_id, live.question.id, remaining);
            Some(remaining)
        }
        None => None,
    };
    if let Some(clock) = runtime.round_clock.as_mut() {
        let remaining = clock.countdown.resume(instant);
        round_service::arm_round_timer(state, session_id, clock.round_number, remaining);
    }

    events::to_session(
        state,
        &handle.code,
        server_events::GAME_RESUMED,
        &GameResumedEvent {
            remaining_ms: remaining.map(duration_ms),
        },
    );
    events::transition_applied(state, &runtime);
    info!(code = %handle.code, "game resumed");
    Ok(())
}

/// Handle `game:end` from the host.
pub async fn end_game(
    state: &SharedState,
    caller: &Caller,
    reason: Option<String>,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;
    end_game_locked(state, &mut runtime, reason.unwrap_or_else(|| "ended by host".into()))
        .await?;
    Ok(())
}

/// Complete the game: final rankings, history record, broadcast, teardown.
pub async fn end_game_locked(
    state: &SharedState,
    runtime: &mut SessionRuntime,
    reason: String,
) -> Result<GameEndedEvent, ServiceError> {
    let store = state.require_game_store().await?;
    let now = SystemTime::now();
    runtime
        .run_transition(&store, SessionEvent::End(reason.clone()), |draft| {
            draft.deactivate_questions();
            if let Some(round) = draft.current_round_mut() {
                if !round.completed {
                    round.completed = true;
                    round.end_time = Some(now);
                }
            }
            draft.paused_at = None;
            draft.ended_at = Some(now);
            draft.recompute_positions();
            Ok(())
        })
        .await?;

    runtime.live_question = None;
    runtime.round_clock = None;
    runtime.buzzer.clear();

    let session = &runtime.session;
    let standings = session.rankings();
    let rounds_played = session.rounds.iter().filter(|round| round.completed).count() as u32;
    let questions_asked = session.asked_question_ids().len() as u32;

    let history = GameHistoryEntity {
        session_id: session.id,
        code: session.code.clone(),
        host_id: session.host_id.clone(),
        reason: reason.clone(),
        rounds_played,
        questions_asked,
        started_at: session.started_at,
        ended_at: now,
        standings: standings
            .iter()
            .map(|standing| StandingEntity {
                player_id: standing.player_id.clone(),
                name: standing.name.clone(),
                score: standing.score,
                rank: standing.rank,
            })
            .collect(),
    };
    if let Err(err) = store.append_history(history).await {
        warn!(session_id = %session.id, error = %err, "failed to append game history");
    }

    let event = GameEndedEvent {
        reason,
        standings,
        rounds_played,
        questions_asked,
    };
    events::to_session(state, &session.code, server_events::GAME_ENDED, &event);
    events::transition_applied(state, runtime);
    info!(
        code = %runtime.session.code,
        reason = %event.reason,
        rounds_played,
        questions_asked,
        "game ended"
    );

    teardown(state, runtime, true);
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::PlayerProfileEntity,
        dto::{session::SessionSettingsInput, validation::validate_join_code},
        services::test_support::{TestClient, app, connect},
    };

    async fn open_session(
        state: &SharedState,
        settings: Option<SessionSettingsInput>,
    ) -> (String, TestClient) {
        let created = create_session(
            state,
            CreateSessionRequest {
                host_id: "host".into(),
                settings,
                round_count: None,
            },
        )
        .await
        .unwrap();
        let mut host = connect(state, "host");
        join(state, &host.caller, &created.code).await.unwrap();
        host.events();
        (created.code, host)
    }

    async fn status_of(state: &SharedState, code: &str) -> SessionStatus {
        snapshot(state, code).await.unwrap().status
    }

    #[test]
    fn generated_codes_pass_join_code_validation() {
        for _ in 0..50 {
            assert!(validate_join_code(&generate_join_code()).is_ok());
        }
    }

    #[tokio::test]
    async fn first_join_moves_the_session_to_the_lobby() {
        let (state, memory) = app(Vec::new()).await;
        memory.insert_player(PlayerProfileEntity {
            id: "alice".into(),
            name: "Alice".into(),
            specialist_subject: Some("History".into()),
        });
        let (code, mut host) = open_session(&state, None).await;
        assert_eq!(status_of(&state, &code).await, SessionStatus::Created);

        let mut alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();

        assert_eq!(status_of(&state, &code).await, SessionStatus::Lobby);
        let joined = host.last(server_events::PLAYER_JOINED).unwrap();
        assert_eq!(joined["name"], "Alice");
        assert_eq!(joined["playerCount"], 1);
        let own_state = alice.last(server_events::GAME_STATE).unwrap();
        assert_eq!(own_state["players"][0]["specialistSubject"], "History");
    }

    #[tokio::test]
    async fn start_requires_host_and_a_player() {
        let (state, _) = app(Vec::new()).await;
        let (code, host) = open_session(&state, None).await;

        let err = start_game(&state, &host.caller).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();
        let err = start_game(&state, &alice.caller).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        start_game(&state, &host.caller).await.unwrap();
        assert_eq!(status_of(&state, &code).await, SessionStatus::Active);

        let err = start_game(&state, &host.caller).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::INVALID_STATE);
    }

    #[tokio::test]
    async fn pause_resume_and_end_follow_the_lifecycle() {
        let (state, memory) = app(Vec::new()).await;
        let (code, mut host) = open_session(&state, None).await;
        let alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();

        assert!(pause_game(&state, &host.caller, None).await.is_err());
        start_game(&state, &host.caller).await.unwrap();
        pause_game(&state, &host.caller, Some("snack break".into()))
            .await
            .unwrap();
        assert_eq!(
            host.last(server_events::GAME_PAUSED).unwrap()["reason"],
            "snack break"
        );
        assert!(pause_game(&state, &host.caller, None).await.is_err());

        resume_game(&state, &host.caller).await.unwrap();
        assert_eq!(status_of(&state, &code).await, SessionStatus::Active);

        end_game(&state, &host.caller, None).await.unwrap();
        let ended = host.last(server_events::GAME_ENDED).unwrap();
        assert_eq!(ended["standings"][0]["playerId"], "alice");
        assert_eq!(ended["standings"][0]["rank"], 1);

        assert!(state.sessions().get(&code).is_none());
        assert_eq!(memory.history().await.len(), 1);
        assert!(matches!(
            snapshot(&state, &code).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn join_rules_are_enforced() {
        let (state, _) = app(Vec::new()).await;
        let (code, host) = open_session(
            &state,
            Some(SessionSettingsInput {
                max_players: Some(1),
                allow_join_after_start: Some(false),
                ..Default::default()
            }),
        )
        .await;

        let alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();
        let bob = connect(&state, "bob");
        let err = join(&state, &bob.caller, &code).await.unwrap_err();
        assert!(err.to_string().contains("full"));

        start_game(&state, &host.caller).await.unwrap();
        let carol = connect(&state, "carol");
        assert!(join(&state, &carol.caller, &code).await.is_err());

        // A second tab of an active player only gains the rooms.
        let alice_tab = connect(&state, "alice");
        join(&state, &alice_tab.caller, &code).await.unwrap();
        assert_eq!(
            state
                .connections()
                .room_size(&Room::Player(code.clone(), "alice".into())),
            2
        );
    }

    #[tokio::test]
    async fn last_player_leaving_an_unstarted_session_destroys_it() {
        let (state, memory) = app(Vec::new()).await;
        let (code, _host) = open_session(&state, None).await;
        let session_id = state.sessions().get(&code).unwrap().id;

        let alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();
        leave(&state, &alice.caller).await.unwrap();

        assert!(state.sessions().get(&code).is_none());
        assert!(memory.stored_session(session_id).is_none());
        assert_eq!(state.connections().session_of(alice.caller.connection_id), None);
    }

    #[tokio::test]
    async fn join_queued_behind_a_destroying_leave_does_not_revive_the_session() {
        let (state, memory) = app(Vec::new()).await;
        let (code, _host) = open_session(&state, None).await;
        let handle = state.sessions().get(&code).unwrap();

        let alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();
        let bob = connect(&state, "bob");

        let guard = handle.runtime().lock().await;
        let leaving = tokio::spawn({
            let state = state.clone();
            let caller = alice.caller.clone();
            async move { leave(&state, &caller).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        let joining = tokio::spawn({
            let state = state.clone();
            let caller = bob.caller.clone();
            let code = code.clone();
            async move { join(&state, &caller, &code).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        leaving.await.unwrap().unwrap();
        let err = joining.await.unwrap().unwrap_err();
        assert_eq!(err.code(), crate::error::codes::NOT_FOUND);
        assert!(state.sessions().get(&code).is_none());
        assert!(memory.stored_session(handle.id).is_none());
        assert_eq!(state.connections().session_of(bob.caller.connection_id), None);
    }

    #[tokio::test]
    async fn leaving_after_start_keeps_the_entry_inactive() {
        let (state, _) = app(Vec::new()).await;
        let (code, host) = open_session(&state, None).await;
        let alice = connect(&state, "alice");
        let bob = connect(&state, "bob");
        join(&state, &alice.caller, &code).await.unwrap();
        join(&state, &bob.caller, &code).await.unwrap();
        toggle_ready(&state, &bob.caller).await.unwrap();
        start_game(&state, &host.caller).await.unwrap();

        leave(&state, &bob.caller).await.unwrap();
        let snapshot = snapshot(&state, &code).await.unwrap();
        let bob_entry = snapshot
            .players
            .iter()
            .find(|player| player.player_id == "bob")
            .unwrap();
        assert!(!bob_entry.active);
        assert!(!bob_entry.ready);
        assert_eq!(snapshot.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn store_outage_rejects_transitions_without_diverging() {
        let (state, memory) = app(Vec::new()).await;
        let (code, host) = open_session(&state, None).await;
        let alice = connect(&state, "alice");
        join(&state, &alice.caller, &code).await.unwrap();

        memory.set_unavailable(true);
        let err = start_game(&state, &host.caller).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::INTERNAL_ERROR);
        memory.set_unavailable(false);

        assert_eq!(status_of(&state, &code).await, SessionStatus::Lobby);
        start_game(&state, &host.caller).await.unwrap();
    }
}
