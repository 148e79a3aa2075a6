//! Answer ledger: at most one accepted record per (player, question), host
//! overrides that replace a record without double counting, and idempotent
//! reveal aggregation.

use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{AnswerKey, QuestionEntity},
    error::ServiceError,
    state::{
        rounds::{ScoringInput, default_override_points, score_submission},
        session::{GameSession, SessionStatus},
    },
};

/// Answer payload as sent by a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    /// Multiple-choice option index.
    Index(usize),
    /// Multi-select option indices.
    Indices(Vec<usize>),
    /// Free text.
    Text(String),
}

/// Accepted answer of one player to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Answering player.
    pub player_id: String,
    /// Question answered.
    pub question_id: Uuid,
    /// Round the question was asked in.
    pub round_number: u32,
    /// Raw answer. `None` when the player timed out.
    pub answer: Option<SubmittedAnswer>,
    /// Whether the answer matched the key or the host said so.
    pub is_correct: bool,
    /// Points applied to the player for this record.
    pub points_earned: i32,
    /// When the answer arrived.
    pub submitted_at: SystemTime,
    /// Time since the question opened, paused time excluded.
    pub response_time_ms: u64,
    /// Whether the client reported a timeout.
    pub timed_out: bool,
    /// Set when the record was written by a host grading override.
    pub overridden: bool,
}

/// Records keyed by (player, question) in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerLedger {
    records: IndexMap<(String, Uuid), AnswerRecord>,
}

impl AnswerLedger {
    /// Record of `player_id` for `question_id`.
    pub fn get(&self, player_id: &str, question_id: Uuid) -> Option<&AnswerRecord> {
        self.records.get(&(player_id.to_string(), question_id))
    }

    /// Insert or replace the record for its pair, returning the superseded one.
    pub fn upsert(&mut self, record: AnswerRecord) -> Option<AnswerRecord> {
        self.records
            .insert((record.player_id.clone(), record.question_id), record)
    }

    /// Every record in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &AnswerRecord> {
        self.records.values()
    }

    /// Records of one question.
    pub fn for_question(&self, question_id: Uuid) -> impl Iterator<Item = &AnswerRecord> {
        self.records
            .values()
            .filter(move |record| record.question_id == question_id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the ledger, keeping insertion order.
    pub fn into_records(self) -> Vec<AnswerRecord> {
        self.records.into_values().collect()
    }
}

impl FromIterator<AnswerRecord> for AnswerLedger {
    fn from_iter<I: IntoIterator<Item = AnswerRecord>>(iter: I) -> Self {
        let mut ledger = AnswerLedger::default();
        for record in iter {
            ledger.upsert(record);
        }
        ledger
    }
}

/// Type-aware correctness check.
pub fn is_correct(key: &AnswerKey, answer: &SubmittedAnswer) -> bool {
    match (key, answer) {
        (AnswerKey::Text { accepted }, SubmittedAnswer::Text(text)) => {
            let given = text.trim().to_lowercase();
            accepted
                .iter()
                .any(|candidate| candidate.trim().to_lowercase() == given)
        }
        (AnswerKey::MultipleChoice { correct_index, .. }, SubmittedAnswer::Index(index)) => {
            correct_index == index
        }
        (AnswerKey::MultiSelect { correct_indices, .. }, SubmittedAnswer::Indices(indices)) => {
            let expected: BTreeSet<usize> = correct_indices.iter().copied().collect();
            let given: BTreeSet<usize> = indices.iter().copied().collect();
            expected == given
        }
        // A single pick on a multi-select question is a one-element set.
        (AnswerKey::MultiSelect { correct_indices, .. }, SubmittedAnswer::Index(index)) => {
            correct_indices.len() == 1 && correct_indices[0] == *index
        }
        _ => false,
    }
}

/// Player submission against the active question.
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    /// Submitting player.
    pub player_id: &'a str,
    /// Question being answered, with its key.
    pub question: &'a QuestionEntity,
    /// Raw answer, if any.
    pub answer: Option<SubmittedAnswer>,
    /// Whether the client gave up on the clock.
    pub timed_out: bool,
    /// Arrival time.
    pub submitted_at: SystemTime,
    /// Time since the question opened, excluding paused time.
    pub elapsed: Duration,
    /// 1-based buzzer position of the player for this question.
    pub buzzer_position: Option<usize>,
}

/// What a player is told after submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    /// Question answered.
    pub question_id: Uuid,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Points earned for it.
    pub points_earned: i32,
    /// Player total after the submission.
    pub total_score: i32,
}

/// Record a submission, applying the round policy's point delta to the player.
pub fn submit(
    session: &mut GameSession,
    submission: Submission<'_>,
) -> Result<SubmissionOutcome, ServiceError> {
    let question_id = submission.question.id;
    let player_id = submission.player_id;

    if session.status != SessionStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "answers are not accepted while the session is {:?}",
            session.status
        )));
    }

    let Some(player) = session.players.get(player_id) else {
        return Err(ServiceError::NotFound(format!(
            "player `{player_id}` is not part of this session"
        )));
    };
    let specialist_subject = player.specialist_subject.clone();

    let (round, active) = session
        .active_question()
        .ok_or(ServiceError::QuestionInactive(question_id))?;
    if active.question_id != question_id {
        return Err(ServiceError::QuestionInactive(question_id));
    }
    let round_number = round.round_number;
    let round_type = round.round_type;
    let settings = round.settings.clone();

    let previous_points = match session.answers.get(player_id, question_id) {
        Some(_) if !settings.allow_resubmission => {
            return Err(ServiceError::AlreadyAnswered {
                player_id: player_id.to_string(),
                question_id,
            });
        }
        Some(previous) => previous.points_earned,
        None => 0,
    };

    let is_correct = match (&submission.answer, submission.timed_out) {
        (_, true) => false,
        (Some(answer), false) => is_correct(&submission.question.answer, answer),
        (None, false) => {
            return Err(ServiceError::InvalidInput(
                "answer is required unless the submission timed out".into(),
            ));
        }
    };

    let points_earned = score_submission(&ScoringInput {
        round_type,
        settings: &settings,
        is_correct,
        timed_out: submission.timed_out,
        elapsed: submission.elapsed,
        buzzer_position: submission.buzzer_position,
        question_category: &submission.question.category,
        specialist_subject: specialist_subject.as_deref(),
    });

    session.answers.upsert(AnswerRecord {
        player_id: player_id.to_string(),
        question_id,
        round_number,
        answer: submission.answer,
        is_correct,
        points_earned,
        submitted_at: submission.submitted_at,
        response_time_ms: u64::try_from(submission.elapsed.as_millis()).unwrap_or(u64::MAX),
        timed_out: submission.timed_out,
        overridden: false,
    });

    let total_score = session
        .apply_score_delta(player_id, points_earned - previous_points)
        .unwrap_or_default();
    session.refresh_round_stats(player_id, round_number);
    session.recompute_positions();

    Ok(SubmissionOutcome {
        question_id,
        is_correct,
        points_earned,
        total_score,
    })
}

/// Host grading decision for one (player, question) pair.
#[derive(Debug, Clone)]
pub struct Override<'a> {
    /// Player whose answer is graded.
    pub target_player_id: &'a str,
    /// Question being graded.
    pub question_id: Uuid,
    /// Correct or incorrect verdict.
    pub force_correct: bool,
    /// Explicit points; the round policy decides when absent.
    pub points: Option<i32>,
    /// Time stamped on a synthesized record.
    pub now: SystemTime,
}

/// Result of a host grading override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideOutcome {
    /// Graded player.
    pub player_id: String,
    /// Graded question.
    pub question_id: Uuid,
    /// Verdict.
    pub is_correct: bool,
    /// Points the record now carries.
    pub points_earned: i32,
    /// Net change applied to the score, prior delta reversed.
    pub score_delta: i32,
    /// Player total after the override.
    pub total_score: i32,
}

/// Replace (or create) the record for a pair, reversing any prior delta first.
pub fn override_answer(
    session: &mut GameSession,
    request: Override<'_>,
) -> Result<OverrideOutcome, ServiceError> {
    let Override {
        target_player_id,
        question_id,
        force_correct,
        points,
        now,
    } = request;

    if !matches!(session.status, SessionStatus::Active | SessionStatus::Paused) {
        return Err(ServiceError::InvalidState(format!(
            "answers cannot be graded while the session is {:?}",
            session.status
        )));
    }

    let player = session.players.get(target_player_id).ok_or_else(|| {
        ServiceError::NotFound(format!("player `{target_player_id}` not found"))
    })?;
    let specialist_subject = player.specialist_subject.clone();

    let round = session
        .round_of_question(question_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}` was not asked")))?;
    let round_number = round.round_number;
    let category = round
        .questions
        .iter()
        .find(|question| question.question_id == question_id)
        .map(|question| question.category.clone())
        .unwrap_or_default();

    let points_earned = points.unwrap_or_else(|| {
        default_override_points(
            round.round_type,
            &round.settings,
            force_correct,
            &category,
            specialist_subject.as_deref(),
        )
    });

    let previous = session.answers.get(target_player_id, question_id).cloned();
    let previous_points = previous
        .as_ref()
        .map(|record| record.points_earned)
        .unwrap_or(0);

    let record = match previous {
        Some(previous) => AnswerRecord {
            is_correct: force_correct,
            points_earned,
            overridden: true,
            ..previous
        },
        None => AnswerRecord {
            player_id: target_player_id.to_string(),
            question_id,
            round_number,
            answer: None,
            is_correct: force_correct,
            points_earned,
            submitted_at: now,
            response_time_ms: 0,
            timed_out: false,
            overridden: true,
        },
    };
    session.answers.upsert(record);

    let score_delta = points_earned - previous_points;
    let total_score = session
        .apply_score_delta(target_player_id, score_delta)
        .unwrap_or_default();
    session.refresh_round_stats(target_player_id, round_number);
    session.recompute_positions();

    Ok(OverrideOutcome {
        player_id: target_player_id.to_string(),
        question_id,
        is_correct: force_correct,
        points_earned,
        score_delta,
        total_score,
    })
}

/// Result of one player for a revealed question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    /// Player identity.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Whether a record exists.
    pub answered: bool,
    /// Whether it was correct.
    pub is_correct: bool,
    /// Whether the player timed out.
    pub timed_out: bool,
    /// Points earned for the question.
    pub points_earned: i32,
}

/// Aggregate statistics for a revealed question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevealSummary {
    /// Revealed question.
    pub question_id: Uuid,
    /// Active players at reveal time.
    pub total_players: usize,
    /// Players with a record.
    pub answered_players: usize,
    /// Correct records.
    pub correct_count: usize,
    /// Incorrect records.
    pub incorrect_count: usize,
    /// Records flagged as timed out.
    pub timed_out_count: usize,
    /// Per-player breakdown in join order.
    pub per_player_result: Vec<PlayerResult>,
}

/// Close the question and aggregate its records. Calling it again without new
/// records yields the same summary.
pub fn reveal(session: &mut GameSession, question_id: Uuid) -> Result<RevealSummary, ServiceError> {
    if !matches!(session.status, SessionStatus::Active | SessionStatus::Paused) {
        return Err(ServiceError::InvalidState(format!(
            "questions cannot be revealed while the session is {:?}",
            session.status
        )));
    }

    let question = session
        .rounds
        .iter_mut()
        .find_map(|round| round.question_mut(question_id))
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}` was not asked")))?;
    question.active = false;
    question.revealed = true;

    let mut summary = RevealSummary {
        question_id,
        total_players: session.players.len(),
        answered_players: 0,
        correct_count: 0,
        incorrect_count: 0,
        timed_out_count: 0,
        per_player_result: Vec::with_capacity(session.players.len()),
    };

    for player in session.players.values() {
        let record = session.answers.get(&player.player_id, question_id);
        let result = match record {
            Some(record) => {
                summary.answered_players += 1;
                if record.timed_out {
                    summary.timed_out_count += 1;
                } else if record.is_correct {
                    summary.correct_count += 1;
                } else {
                    summary.incorrect_count += 1;
                }
                PlayerResult {
                    player_id: player.player_id.clone(),
                    name: player.name.clone(),
                    answered: true,
                    is_correct: record.is_correct,
                    timed_out: record.timed_out,
                    points_earned: record.points_earned,
                }
            }
            None => PlayerResult {
                player_id: player.player_id.clone(),
                name: player.name.clone(),
                answered: false,
                is_correct: false,
                timed_out: false,
                points_earned: 0,
            },
        };
        summary.per_player_result.push(result);
    }

    Ok(summary)
}
