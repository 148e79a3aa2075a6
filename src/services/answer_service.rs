use std::time::SystemTime;

use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::{
        events::{AnswerConfirmedEvent, AnswerReceivedEvent, BuzzerFirstEvent, PlayerBuzzedEvent},
        ws::{BuzzPayload, GradePayload, SubmitAnswerPayload, server_events},
    },
    error::ServiceError,
    services::{
        Caller, events,
        session_service::{caller_session, ensure_host},
    },
    state::{
        SharedState,
        ledger::{self, Override, Submission},
        registry::LiveQuestion,
        rounds::RoundType,
        session::SessionStatus,
    },
};

/// Live question matching `question_id`, or `QuestionInactive`.
fn live_question(live: Option<&LiveQuestion>, question_id: Uuid) -> Result<&LiveQuestion, ServiceError> {
    live.filter(|live| live.question.id == question_id)
        .ok_or(ServiceError::QuestionInactive(question_id))
}

/// Handle `answer:submit` from a player.
pub async fn submit_answer(
    state: &SharedState,
    caller: &Caller,
    payload: SubmitAnswerPayload,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;

    if runtime.session.is_host(&caller.identity) {
        return Err(ServiceError::PermissionDenied(
            "the host cannot answer questions".into(),
        ));
    }
    if runtime.session.status == SessionStatus::Paused {
        return Err(ServiceError::InvalidState(
            "answers are not accepted while the game is paused".into(),
        ));
    }
    let player_id = caller.identity.as_str();
    let question_id = payload.question_id;
    let live = live_question(runtime.live_question.as_ref(), question_id)?;
    let elapsed = live.countdown.elapsed(Instant::now());

    let mut draft = runtime.session.clone();
    let outcome = ledger::submit(
        &mut draft,
        Submission {
            player_id,
            question: &live.question,
            answer: payload.answer,
            timed_out: payload.timed_out,
            submitted_at: SystemTime::now(),
            elapsed,
            buzzer_position: runtime.buzzer.position(player_id, question_id),
        },
    )?;
    runtime.commit(&store, draft).await?;
    state.metrics().answer_recorded(runtime.session.id);

    let answered_count = runtime.session.answers.for_question(question_id).count();
    events::to_player(
        state,
        &handle.code,
        player_id,
        server_events::ANSWER_CONFIRMED,
        &AnswerConfirmedEvent {
            question_id,
            is_correct: outcome.is_correct,
            points_earned: outcome.points_earned,
            total_score: outcome.total_score,
            overridden: false,
        },
    );
    events::to_host(
        state,
        &handle.code,
        server_events::ANSWER_RECEIVED,
        &AnswerReceivedEvent {
            player_id: player_id.to_string(),
            question_id,
            answered_count,
            total_players: runtime.session.active_player_count(),
        },
    );
    debug!(
        code = %handle.code,
        player_id,
        %question_id,
        correct = outcome.is_correct,
        points = outcome.points_earned,
        "answer recorded"
    );
    Ok(())
}

/// Handle `answer:correct` / `answer:incorrect` from the host.
pub async fn grade(
    state: &SharedState,
    caller: &Caller,
    payload: GradePayload,
    force_correct: bool,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let store = state.require_game_store().await?;
    let mut runtime = handle.lock_open().await?;
    ensure_host(&runtime.session, caller)?;

    let mut draft = runtime.session.clone();
    let outcome = ledger::override_answer(
        &mut draft,
        Override {
            target_player_id: &payload.target_player_id,
            question_id: payload.question_id,
            force_correct,
            points: payload.points,
            now: SystemTime::now(),
        },
    )?;
    runtime.commit(&store, draft).await?;

    events::to_player(
        state,
        &handle.code,
        &outcome.player_id,
        server_events::ANSWER_CONFIRMED,
        &AnswerConfirmedEvent {
            question_id: outcome.question_id,
            is_correct: outcome.is_correct,
            points_earned: outcome.points_earned,
            total_score: outcome.total_score,
            overridden: true,
        },
    );
    events::broadcast_state(state, &runtime);
    info!(
        code = %handle.code,
        player_id = %outcome.player_id,
        question_id = %outcome.question_id,
        correct = force_correct,
        delta = outcome.score_delta,
        "answer graded by host"
    );
    Ok(())
}

/// Handle `player:buzzer`: queue the buzz and tell the host who was first.
pub async fn buzz(
    state: &SharedState,
    caller: &Caller,
    payload: BuzzPayload,
) -> Result<(), ServiceError> {
    let handle = caller_session(state, caller).await?;
    let mut runtime = handle.lock_open().await?;

    if runtime.session.status != SessionStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "buzzing is not possible while the session is {:?}",
            runtime.session.status
        )));
    }
    let player_id = caller.identity.as_str();
    let name = match runtime.session.players.get(player_id) {
        Some(player) if player.active => player.name.clone(),
        _ => {
            return Err(ServiceError::PermissionDenied(
                "only active players can buzz".into(),
            ));
        }
    };
    let question_id = payload.question_id;
    let live = live_question(runtime.live_question.as_ref(), question_id)?;
    let round_type = runtime
        .session
        .round(live.round_number)
        .map(|round| round.round_type);
    if round_type != Some(RoundType::FastestFinger) {
        return Err(ServiceError::InvalidState(
            "the buzzer is only used in fastest-finger rounds".into(),
        ));
    }

    let outcome = runtime.buzzer.activate(player_id, question_id, Instant::now());
    let event = PlayerBuzzedEvent {
        player_id: player_id.to_string(),
        name: name.clone(),
        question_id,
        position: outcome.position,
    };
    if !outcome.newly_added {
        events::to_connection(state, caller.connection_id, server_events::PLAYER_BUZZED, &event);
        return Ok(());
    }

    state.metrics().buzz_recorded(runtime.session.id);
    events::to_session(state, &handle.code, server_events::PLAYER_BUZZED, &event);
    if outcome.position == 1 {
        events::to_host(
            state,
            &handle.code,
            server_events::BUZZER_FIRST,
            &BuzzerFirstEvent {
                player_id: player_id.to_string(),
                name,
                question_id,
            },
        );
    }
    debug!(code = %handle.code, player_id, position = outcome.position, "buzz recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::advance;

    use super::*;
    use crate::{
        dao::models::PlayerProfileEntity,
        dto::ws::NextQuestionPayload,
        services::{
            question_service, session_service,
            test_support::{TestClient, app, choice_question, running_game, start_first_round},
        },
        state::{ledger::SubmittedAnswer, rounds::RoundSettingsInput},
    };

    fn graduated() -> RoundSettingsInput {
        RoundSettingsInput {
            max_points: Some(20),
            min_points: Some(5),
            decrease_rate: Some(0.5),
            ..RoundSettingsInput::default()
        }
    }

    fn submission(question_id: Uuid, index: usize) -> SubmitAnswerPayload {
        SubmitAnswerPayload {
            question_id,
            answer: Some(SubmittedAnswer::Index(index)),
            timed_out: false,
        }
    }

    async fn open_question(state: &SharedState, host: &TestClient) {
        question_service::next_question(state, &host.caller, NextQuestionPayload::default())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_first_buzzer_scores_in_fastest_finger() {
        let question = choice_question("Sport", 2);
        let (state, code, mut host, mut players) = running_game(
            vec![question.clone()],
            &["alice", "bob"],
            "fastest-finger",
            RoundSettingsInput::default(),
        )
        .await;
        open_question(&state, &host).await;

        buzz(&state, &players[1].caller, BuzzPayload { question_id: question.id })
            .await
            .unwrap();
        advance(Duration::from_millis(50)).await;
        buzz(&state, &players[0].caller, BuzzPayload { question_id: question.id })
            .await
            .unwrap();

        let host_events = host.events();
        let first: Vec<_> = host_events
            .iter()
            .filter(|(name, _)| name == server_events::BUZZER_FIRST)
            .collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1["playerId"], "bob");

        submit_answer(&state, &players[0].caller, submission(question.id, 2))
            .await
            .unwrap();
        submit_answer(&state, &players[1].caller, submission(question.id, 2))
            .await
            .unwrap();

        let alice = players[0].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(alice["isCorrect"], true);
        assert_eq!(alice["pointsEarned"], 0);
        let bob = players[1].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(bob["pointsEarned"], 10);

        let received = host.last(server_events::ANSWER_RECEIVED).unwrap();
        assert_eq!(received["answeredCount"], 2);
        assert_eq!(received["totalPlayers"], 2);

        let handle = state.sessions().get(&code).unwrap();
        let runtime = handle.runtime().lock().await;
        assert_eq!(runtime.session.players["bob"].score, 10);
        assert_eq!(runtime.session.players["alice"].score, 0);
    }

    #[tokio::test]
    async fn duplicate_buzz_only_answers_the_caller() {
        let question = choice_question("Sport", 0);
        let (state, _code, mut host, mut players) = running_game(
            vec![question.clone()],
            &["alice", "bob"],
            "fastest-finger",
            RoundSettingsInput::default(),
        )
        .await;
        open_question(&state, &host).await;
        buzz(&state, &players[0].caller, BuzzPayload { question_id: question.id })
            .await
            .unwrap();
        host.events();
        players[1].events();

        buzz(&state, &players[0].caller, BuzzPayload { question_id: question.id })
            .await
            .unwrap();
        let echoed = players[0].last(server_events::PLAYER_BUZZED).unwrap();
        assert_eq!(echoed["position"], 1);
        assert!(host.events().is_empty());
        assert!(players[1].events().is_empty());
    }

    #[tokio::test]
    async fn buzzing_outside_fastest_finger_is_rejected() {
        let question = choice_question("Sport", 0);
        let (state, _code, host, players) = running_game(
            vec![question.clone()],
            &["alice"],
            "point-builder",
            RoundSettingsInput::default(),
        )
        .await;
        open_question(&state, &host).await;
        let err = buzz(&state, &players[0].caller, BuzzPayload { question_id: question.id })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn second_submission_is_rejected_and_score_unchanged() {
        let question = choice_question("Art", 3);
        let (state, code, host, players) = running_game(
            vec![question.clone()],
            &["alice"],
            "point-builder",
            RoundSettingsInput::default(),
        )
        .await;
        open_question(&state, &host).await;

        submit_answer(&state, &players[0].caller, submission(question.id, 3))
            .await
            .unwrap();
        let err = submit_answer(&state, &players[0].caller, submission(question.id, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyAnswered { .. }));

        let err = submit_answer(&state, &host.caller, submission(question.id, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        let handle = state.sessions().get(&code).unwrap();
        assert_eq!(handle.runtime().lock().await.session.players["alice"].score, 10);
    }

    #[tokio::test]
    async fn answers_wait_while_paused_but_grading_does_not() {
        let question = choice_question("Art", 3);
        let (state, code, host, mut players) = running_game(
            vec![question.clone()],
            &["alice"],
            "point-builder",
            RoundSettingsInput::default(),
        )
        .await;
        open_question(&state, &host).await;
        session_service::pause_game(&state, &host.caller, None)
            .await
            .unwrap();

        let err = submit_answer(&state, &players[0].caller, submission(question.id, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        grade(
            &state,
            &host.caller,
            GradePayload {
                target_player_id: "alice".into(),
                question_id: question.id,
                points: None,
            },
            true,
        )
        .await
        .unwrap();
        let confirmed = players[0].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(confirmed["overridden"], true);
        assert_eq!(confirmed["pointsEarned"], 10);

        let handle = state.sessions().get(&code).unwrap();
        assert_eq!(handle.runtime().lock().await.session.players["alice"].score, 10);
    }

    #[tokio::test]
    async fn regrading_replaces_the_previous_points() {
        let question = choice_question("Art", 3);
        let (state, code, host, players) = running_game(
            vec![question.clone()],
            &["alice"],
            "point-builder",
            RoundSettingsInput::default(),
        )
        .await;
        open_question(&state, &host).await;
        submit_answer(&state, &players[0].caller, submission(question.id, 3))
            .await
            .unwrap();

        let payload = |points| GradePayload {
            target_player_id: "alice".into(),
            question_id: question.id,
            points,
        };
        grade(&state, &host.caller, payload(Some(25)), true)
            .await
            .unwrap();
        grade(&state, &host.caller, payload(Some(4)), true)
            .await
            .unwrap();

        let handle = state.sessions().get(&code).unwrap();
        assert_eq!(handle.runtime().lock().await.session.players["alice"].score, 4);

        let err = grade(&state, &players[0].caller, payload(None), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn graduated_points_decay_with_answer_time() {
        let question = choice_question("Science", 1);
        let (state, code, host, mut players) = running_game(
            vec![question.clone()],
            &["alice"],
            "graduated-points",
            graduated(),
        )
        .await;
        open_question(&state, &host).await;

        advance(Duration::from_secs(10)).await;
        submit_answer(&state, &players[0].caller, submission(question.id, 1))
            .await
            .unwrap();

        let confirmed = players[0].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(confirmed["pointsEarned"], 15);
        let handle = state.sessions().get(&code).unwrap();
        assert_eq!(handle.runtime().lock().await.session.players["alice"].score, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn graduated_points_ignore_time_spent_paused() {
        let question = choice_question("Science", 1);
        let (state, code, host, mut players) = running_game(
            vec![question.clone()],
            &["alice"],
            "graduated-points",
            graduated(),
        )
        .await;
        open_question(&state, &host).await;

        advance(Duration::from_secs(4)).await;
        session_service::pause_game(&state, &host.caller, None)
            .await
            .unwrap();
        advance(Duration::from_secs(60)).await;
        session_service::resume_game(&state, &host.caller)
            .await
            .unwrap();
        advance(Duration::from_secs(6)).await;
        submit_answer(&state, &players[0].caller, submission(question.id, 1))
            .await
            .unwrap();

        let confirmed = players[0].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(confirmed["pointsEarned"], 15);
        let handle = state.sessions().get(&code).unwrap();
        assert_eq!(handle.runtime().lock().await.session.players["alice"].score, 15);
    }

    #[tokio::test]
    async fn specialists_score_double_on_their_subject() {
        let history = choice_question("History", 0);
        let (state, memory) = app(vec![history.clone()]).await;
        memory.insert_player(PlayerProfileEntity {
            id: "alice".into(),
            name: "Alice".into(),
            specialist_subject: Some("History".into()),
        });
        memory.insert_player(PlayerProfileEntity {
            id: "bob".into(),
            name: "Bob".into(),
            specialist_subject: Some("Geography".into()),
        });
        let (code, host, mut players) = start_first_round(
            &state,
            &["alice", "bob"],
            "specialist",
            RoundSettingsInput::default(),
            None,
        )
        .await;
        open_question(&state, &host).await;

        submit_answer(&state, &players[0].caller, submission(history.id, 0))
            .await
            .unwrap();
        submit_answer(&state, &players[1].caller, submission(history.id, 0))
            .await
            .unwrap();

        let alice = players[0].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(alice["pointsEarned"], 20);
        let bob = players[1].last(server_events::ANSWER_CONFIRMED).unwrap();
        assert_eq!(bob["pointsEarned"], 10);

        let handle = state.sessions().get(&code).unwrap();
        let runtime = handle.runtime().lock().await;
        assert_eq!(runtime.session.players["alice"].score, 20);
        assert_eq!(runtime.session.players["bob"].score, 10);
    }
}
