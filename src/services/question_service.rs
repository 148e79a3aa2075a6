use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::QuestionFilter,
    dto::{
        events::{QuestionPayload, QuestionRevealEvent, QuestionTimeUpEvent},
        ws::{NextQuestionPayload, server_events},
    },
    error::ServiceError,
    services::{
        Caller, events,
        session_service::{caller_session, ensure_host},
    },
    state::{
        SharedState,
        ledger::{self, Submission},
        registry::{LiveQuestion, SessionRuntime},
        session::{QuestionRef, SessionStatus},
        timers::{Countdown, TimerKey},
    },
};

/// Schedule expiry of the open question, replacing any previous question timer.
pub fn arm_question_timer(state: &SharedState, session_id: Uuid, question_id: Uuid, delay: Duration) {
    let shared = state.clone();
    state
        .timers()
        .schedule(TimerKey::Question(session_id), delay, move || async move {
            on_question_expired(shared, session_id, question_id).await;
        });
}

/// Handle `question:next`: pick a question for the current round and open it.
pub async fn next_question(
    state: &SharedState,
    caller: &Caller,
    payload: NextQuestionPayload,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;

    if runtime.session.status != SessionStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "questions can only be asked while the game is active (currently {:?})",
            runtime.session.status
        )));
    }
    let round = runtime
        .session
        .current_round()
        .filter(|round| !round.completed)
        .ok_or_else(|| ServiceError::InvalidState("start a round before asking questions".into()))?;
    let round_number = round.round_number;
    let round_type = round.round_type;
    let default_time_limit = round.settings.time_limit_seconds;

    if let Some((_, active)) = runtime.session.active_question() {
        return Err(ServiceError::InvalidState(format!(
            "question `{}` is still active",
            active.question_id
        )));
    }

    let asked = runtime.session.asked_question_ids();
    let pool_size = runtime.session.settings.question_pool_size as usize;
    if asked.len() >= pool_size {
        return Err(ServiceError::InvalidState(format!(
            "question pool of {pool_size} exhausted"
        )));
    }

    let question = match payload.question_id {
        Some(question_id) => {
            if asked.contains(&question_id) {
                return Err(ServiceError::InvalidState(format!(
                    "question `{question_id}` was already asked in this session"
                )));
            }
            let question = store.find_question(question_id).await?.ok_or_else(|| {
                ServiceError::NotFound(format!("question `{question_id}` not found"))
            })?;
            if !question.round_types.is_empty() && !question.round_types.contains(&round_type) {
                return Err(ServiceError::InvalidInput(format!(
                    "question `{question_id}` cannot be used in a {round_type} round"
                )));
            }
            question
        }
        None => store
            .next_question(QuestionFilter {
                category: payload.category.clone(),
                difficulty: payload.difficulty.clone(),
                round_type: Some(round_type),
                exclude: asked,
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound("no unused question matches".into()))?,
    };

    let time_limit_seconds = payload.time_limit.unwrap_or(default_time_limit);
    let mut draft = runtime.session.clone();
    let round = draft
        .round_mut(round_number)
        .ok_or(ServiceError::RoundNotFound(round_number))?;
    round.questions.push(QuestionRef {
        question_id: question.id,
        category: question.category.clone(),
        start_time: SystemTime::now(),
        time_limit_seconds,
        active: true,
        revealed: false,
    });
    let question_index = round.questions.len() - 1;
    draft.current_question_index = Some(question_index);
    runtime.commit(&store, draft).await?;

    let session_id = runtime.session.id;
    let question_id = question.id;
    let time_limit = Duration::from_secs(u64::from(time_limit_seconds));
    runtime.buzzer.clear();
    let live = LiveQuestion {
        question,
        round_number,
        countdown: Countdown::start(Instant::now(), time_limit),
    };
    let outbound = QuestionPayload::from_live(&runtime.session, &live, Instant::now());
    runtime.live_question = Some(live);
    arm_question_timer(state, session_id, question_id, time_limit);

    events::to_session(state, &handle.code, server_events::QUESTION_NEW, &outbound);
    info!(
        code = %handle.code,
        %question_id,
        round_number,
        time_limit_seconds,
        "question opened"
    );
    Ok(())
}

/// Timer callback. Ignored when the question was closed, replaced or paused meanwhile.
pub async fn on_question_expired(state: SharedState, session_id: Uuid, question_id: Uuid) {
    let Some(handle) = state.sessions().get_by_id(session_id) else {
        debug!(%session_id, "question timer fired for a closed session");
        return;
    };
    let Ok(mut runtime) = handle.lock_open().await else {
        return;
    };

    let current = runtime
        .live_question
        .as_ref()
        .is_some_and(|live| live.question.id == question_id && !live.countdown.is_paused());
    if !current || runtime.session.status != SessionStatus::Active {
        debug!(%session_id, %question_id, "stale question timer ignored");
        return;
    }

    if let Err(err) = expire_question_locked(&state, &mut runtime).await {
        warn!(%session_id, %question_id, error = %err, "failed to expire question");
    }
}

/// Close the live question: timed-out records for silent players, `question:timeUp`.
async fn expire_question_locked(
    state: &SharedState,
    runtime: &mut SessionRuntime,
) -> Result<(), ServiceError> {
    let store = state.require_game_store().await?;
    let Some(live) = runtime.live_question.clone() else {
        return Ok(());
    };
    let question_id = live.question.id;

    let mut draft = runtime.session.clone();
    let silent: Vec<String> = draft
        .players
        .values()
        .filter(|player| player.active && draft.answers.get(&player.player_id, question_id).is_none())
        .map(|player| player.player_id.clone())
        .collect();
    let submitted_at = SystemTime::now();
    for player_id in &silent {
        ledger::submit(
            &mut draft,
            Submission {
                player_id,
                question: &live.question,
                answer: None,
                timed_out: true,
                submitted_at,
                elapsed: live.countdown.time_limit(),
                buzzer_position: runtime.buzzer.position(player_id, question_id),
            },
        )?;
    }
    if let Some(question) = draft
        .rounds
        .iter_mut()
        .find_map(|round| round.question_mut(question_id))
    {
        question.active = false;
    }
    runtime.commit(&store, draft).await?;

    runtime.live_question = None;
    runtime.buzzer.clear();
    events::to_session(
        state,
        &runtime.session.code,
        server_events::QUESTION_TIME_UP,
        &QuestionTimeUpEvent {
            question_id,
            correct_answer: live.question.answer,
        },
    );
    info!(
        code = %runtime.session.code,
        %question_id,
        timed_out = silent.len(),
        "question time is up"
    );
    Ok(())
}

/// Handle `question:reveal`: close the question and publish its aggregate.
pub async fn reveal(
    state: &SharedState,
    caller: &Caller,
    question_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;

    let live_answer = runtime
        .live_question
        .as_ref()
        .filter(|live| live.question.id == question_id)
        .map(|live| live.question.answer.clone());
    let is_live = live_answer.is_some();
    let correct_answer = match live_answer {
        Some(answer) => Some(answer),
        None => match store.find_question(question_id).await {
            Ok(question) => question.map(|question| question.answer),
            Err(err) => {
                warn!(%question_id, error = %err, "could not load the answer key for reveal");
                None
            }
        },
    };

    let mut draft = runtime.session.clone();
    let results = ledger::reveal(&mut draft, question_id)?;
    runtime.commit(&store, draft).await?;

    if is_live {
        runtime.live_question = None;
        runtime.buzzer.clear();
        state.timers().cancel(&TimerKey::Question(runtime.session.id));
    }

    info!(
        code = %handle.code,
        %question_id,
        answered = results.answered_players,
        correct = results.correct_count,
        "question revealed"
    );
    events::to_session(
        state,
        &handle.code,
        server_events::QUESTION_REVEAL,
        &QuestionRevealEvent {
            question_id,
            correct_answer,
            results,
        },
    );
    Ok(())
}
