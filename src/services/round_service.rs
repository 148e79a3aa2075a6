use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{RoundEndedEvent, RoundResult, RoundStartedEvent},
        ws::{EndRoundPayload, StartRoundPayload, server_events},
    },
    error::ServiceError,
    services::{
        Caller, events,
        session_service::{caller_session, end_game_locked, ensure_host},
    },
    state::{
        SharedState,
        registry::{RoundClock, SessionRuntime},
        rounds::{RoundSettings, RoundType},
        session::{GameSession, Round, SessionStatus, competition_ranks},
        timers::{Countdown, TimerKey},
    },
};

/// Schedule the round time limit, replacing any previous round timer.
pub fn arm_round_timer(state: &SharedState, session_id: Uuid, round_number: u32, delay: Duration) {
    let shared = state.clone();
    state
        .timers()
        .schedule(TimerKey::Round(session_id), delay, move || async move {
            on_round_expired(shared, session_id, round_number).await;
        });
}

/// Handle `round:start`: resolve settings, snapshot score baselines, announce.
pub async fn start_round(
    state: &SharedState,
    caller: &Caller,
    payload: StartRoundPayload,
) -> Result<(), ServiceError> {
    let round_type: RoundType = payload.round_type.parse()?;
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;

    let session = &runtime.session;
    if session.status != SessionStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "rounds can only start while the game is active (currently {:?})",
            session.status
        )));
    }
    if let Some(current) = session.current_round().filter(|round| !round.completed) {
        return Err(ServiceError::InvalidState(format!(
            "round {} is still in progress",
            current.round_number
        )));
    }
    if session.active_question().is_some() {
        return Err(ServiceError::InvalidState(
            "close the open question before starting a round".into(),
        ));
    }
    let round_number = payload.round_number;
    if session.round(round_number).is_some_and(|round| round.completed) {
        return Err(ServiceError::InvalidState(format!(
            "round {round_number} was already played"
        )));
    }

    let settings = RoundSettings::merged(
        round_type,
        state.config().default_question_time_secs,
        &payload.settings,
    )?;
    let title = payload
        .title
        .clone()
        .unwrap_or_else(|| format!("Round {round_number}"));

    let mut draft = runtime.session.clone();
    let round = Round {
        round_number,
        round_type,
        title: title.clone(),
        settings: settings.clone(),
        questions: Vec::new(),
        completed: false,
        start_time: Some(SystemTime::now()),
        end_time: None,
        baseline_scores: draft
            .players
            .values()
            .map(|player| (player.player_id.clone(), player.score))
            .collect(),
    };
    match draft.round_mut(round_number) {
        Some(slot) => *slot = round,
        None => draft.rounds.push(round),
    }
    draft.current_round_number = Some(round_number);
    draft.current_question_index = None;
    runtime.commit(&store, draft).await?;

    let session_id = runtime.session.id;
    runtime.buzzer.clear();
    match settings.round_time_limit_seconds {
        Some(limit) => {
            let limit = Duration::from_secs(u64::from(limit));
            runtime.round_clock = Some(RoundClock {
                round_number,
                countdown: Countdown::start(Instant::now(), limit),
            });
            arm_round_timer(state, session_id, round_number, limit);
        }
        None => {
            runtime.round_clock = None;
            state.timers().cancel(&TimerKey::Round(session_id));
        }
    }

    events::to_session(
        state,
        &handle.code,
        server_events::ROUND_STARTED,
        &RoundStartedEvent {
            round_number,
            round_type,
            title,
            settings,
        },
    );
    info!(code = %handle.code, round_number, %round_type, "round started");
    Ok(())
}

/// Handle `round:end`.
pub async fn end_round(
    state: &SharedState,
    caller: &Caller,
    payload: EndRoundPayload,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;
    end_round_locked(state, &mut runtime, payload.round_number).await?;
    Ok(())
}

/// Close a round, publish its ranked summary and end the game when the
/// configured number of rounds has been played.
pub async fn end_round_locked(
    state: &SharedState,
    runtime: &mut SessionRuntime,
    round_number: u32,
) -> Result<RoundEndedEvent, ServiceError> {
    let store = state.require_game_store().await?;
    if !matches!(
        runtime.session.status,
        SessionStatus::Active | SessionStatus::Paused
    ) {
        return Err(ServiceError::InvalidState(format!(
            "rounds cannot end while the session is {:?}",
            runtime.session.status
        )));
    }
    let round = runtime
        .session
        .round(round_number)
        .ok_or(ServiceError::RoundNotFound(round_number))?;
    if round.completed {
        return Err(ServiceError::InvalidState(format!(
            "round {round_number} already ended"
        )));
    }

    let mut draft = runtime.session.clone();
    if let Some(round) = draft.round_mut(round_number) {
        for question in &mut round.questions {
            question.active = false;
        }
        round.completed = true;
        round.end_time = Some(SystemTime::now());
    }
    if draft.current_round_number == Some(round_number) {
        draft.current_question_index = None;
    }
    let summary = round_summary(&draft, round_number);
    runtime.commit(&store, draft).await?;

    let session_id = runtime.session.id;
    if runtime
        .live_question
        .as_ref()
        .is_some_and(|live| live.round_number == round_number)
    {
        runtime.live_question = None;
        runtime.buzzer.clear();
        state.timers().cancel(&TimerKey::Question(session_id));
    }
    if runtime
        .round_clock
        .is_some_and(|clock| clock.round_number == round_number)
    {
        runtime.round_clock = None;
        state.timers().cancel(&TimerKey::Round(session_id));
    }

    let event = RoundEndedEvent {
        round_number,
        summary,
    };
    events::to_session(
        state,
        &runtime.session.code,
        server_events::ROUND_ENDED,
        &event,
    );
    info!(code = %runtime.session.code, round_number, "round ended");

    let completed_rounds = runtime
        .session
        .rounds
        .iter()
        .filter(|round| round.completed)
        .count();
    if let Some(limit) = runtime.session.settings.round_count {
        if completed_rounds >= limit as usize {
            end_game_locked(state, runtime, "final round completed".into()).await?;
        }
    }
    Ok(event)
}

/// Timer callback for the round time limit.
pub async fn on_round_expired(state: SharedState, session_id: Uuid, round_number: u32) {
    let Some(handle) = state.sessions().get_by_id(session_id) else {
        debug!(%session_id, "round timer fired for a closed session");
        return;
    };
    let Ok(mut runtime) = handle.lock_open().await else {
        return;
    };

    let current = runtime
        .round_clock
        .is_some_and(|clock| clock.round_number == round_number && !clock.countdown.is_paused());
    if !current || runtime.session.status != SessionStatus::Active {
        debug!(%session_id, round_number, "stale round timer ignored");
        return;
    }

    info!(code = %handle.code, round_number, "round time limit reached");
    if let Err(err) = end_round_locked(&state, &mut runtime, round_number).await {
        warn!(%session_id, round_number, error = %err, "failed to end expired round");
    }
}

/// Per-player results of a round, ranked by points gained since it started.
pub fn round_summary(session: &GameSession, round_number: u32) -> Vec<RoundResult> {
    let Some(round) = session.round(round_number) else {
        return Vec::new();
    };

    let mut lines: Vec<RoundResult> = session
        .players
        .values()
        .map(|player| {
            let baseline = round
                .baseline_scores
                .get(&player.player_id)
                .copied()
                .unwrap_or(0);
            let stats = player
                .round_stats
                .get(&round_number)
                .cloned()
                .unwrap_or_default();
            let timings: Vec<u64> = session
                .answers
                .records()
                .filter(|record| {
                    record.player_id == player.player_id
                        && record.round_number == round_number
                        && !record.timed_out
                        && !record.overridden
                })
                .map(|record| record.response_time_ms)
                .collect();
            let average_response_ms = (!timings.is_empty())
                .then(|| timings.iter().sum::<u64>() / timings.len() as u64);

            RoundResult {
                player_id: player.player_id.clone(),
                name: player.name.clone(),
                round_score: player.score - baseline,
                correct: stats.correct,
                incorrect: stats.incorrect,
                average_response_ms,
                rank: 0,
            }
        })
        .collect();

    // Stable sort keeps join order between equal deltas.
    lines.sort_by(|a, b| b.round_score.cmp(&a.round_score));
    let scores: Vec<i32> = lines.iter().map(|line| line.round_score).collect();
    for (line, rank) in lines.iter_mut().zip(competition_ranks(&scores)) {
        line.rank = rank;
    }
    lines
}
