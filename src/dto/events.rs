//! Payloads of the outbound WebSocket events.

use serde::Serialize;
use serde_with::skip_serializing_none;
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::AnswerKey,
    dto::format_system_time,
    state::{
        ledger::RevealSummary,
        registry::{LiveQuestion, SessionRuntime},
        rounds::{RoundSettings, RoundType},
        session::{GameSession, PlayerEntry, Round, SessionSettings, SessionStatus, Standing},
    },
};

/// Full view of a session, sent as `game:state` and on resynchronisation.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    /// Session id.
    pub session_id: Uuid,
    /// Join code.
    pub code: String,
    /// Host identity.
    pub host_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Round in progress or last played.
    pub current_round_number: Option<u32>,
    /// Index of the open question within its round.
    pub current_question_index: Option<usize>,
    /// Session settings.
    pub settings: SessionSettings,
    /// Players in join order.
    pub players: Vec<PlayerSnapshot>,
    /// Rounds played or in progress.
    pub rounds: Vec<RoundSnapshot>,
    /// Question open for answers, with its remaining time.
    pub active_question: Option<QuestionPayload>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 start time.
    pub started_at: Option<String>,
    /// RFC 3339 start of the current pause.
    pub paused_at: Option<String>,
    /// RFC 3339 end time.
    pub ended_at: Option<String>,
}

impl GameStateSnapshot {
    /// Snapshot of a live runtime, including the open question's clock.
    pub fn from_runtime(runtime: &SessionRuntime, now: Instant) -> Self {
        let active_question = runtime
            .live_question
            .as_ref()
            .map(|live| QuestionPayload::from_live(&runtime.session, live, now));
        Self::from_session(&runtime.session, active_question)
    }

    /// Snapshot of a session aggregate.
    pub fn from_session(session: &GameSession, active_question: Option<QuestionPayload>) -> Self {
        Self {
            session_id: session.id,
            code: session.code.clone(),
            host_id: session.host_id.clone(),
            status: session.status,
            current_round_number: session.current_round_number,
            current_question_index: session.current_question_index,
            settings: session.settings.clone(),
            players: session.players.values().map(PlayerSnapshot::from).collect(),
            rounds: session.rounds.iter().map(RoundSnapshot::from).collect(),
            active_question,
            created_at: format_system_time(session.created_at),
            started_at: session.started_at.map(format_system_time),
            paused_at: session.paused_at.map(format_system_time),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// Player line of a snapshot.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// Player identity.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Specialist subject, if any.
    pub specialist_subject: Option<String>,
    /// Current score.
    pub score: i32,
    /// Current rank.
    pub position: u32,
    /// Whether the player is present.
    pub active: bool,
    /// Lobby ready flag.
    pub ready: bool,
}

impl From<&PlayerEntry> for PlayerSnapshot {
    fn from(player: &PlayerEntry) -> Self {
        Self {
            player_id: player.player_id.clone(),
            name: player.name.clone(),
            specialist_subject: player.specialist_subject.clone(),
            score: player.score,
            position: player.position,
            active: player.active,
            ready: player.ready,
        }
    }
}

/// Round line of a snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    /// 1-based round number.
    pub round_number: u32,
    /// Scoring policy.
    pub round_type: RoundType,
    /// Display title.
    pub title: String,
    /// Whether the round ended.
    pub completed: bool,
    /// Questions asked in the round.
    pub question_count: usize,
}

impl From<&Round> for RoundSnapshot {
    fn from(round: &Round) -> Self {
        Self {
            round_number: round.round_number,
            round_type: round.round_type,
            title: round.title.clone(),
            completed: round.completed,
            question_count: round.questions.len(),
        }
    }
}

/// Question as shown to players; never carries the answer.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    /// Catalog question id.
    pub question_id: Uuid,
    /// Round it is asked in.
    pub round_number: u32,
    /// Position within the round.
    pub question_index: usize,
    /// Question text.
    pub text: String,
    /// Catalog category.
    pub category: String,
    /// Catalog difficulty.
    pub difficulty: String,
    /// Answer kind, e.g. `multiple_choice`.
    pub kind: String,
    /// Choices for multiple-choice questions. Empty otherwise.
    pub options: Vec<String>,
    /// Answer window in seconds.
    pub time_limit_seconds: u32,
    /// Time left on the answer clock.
    pub remaining_ms: u64,
    /// Whether the clock is frozen.
    pub paused: bool,
}

impl QuestionPayload {
    /// Player view of the live question.
    pub fn from_live(session: &GameSession, live: &LiveQuestion, now: Instant) -> Self {
        let question_index = session
            .round(live.round_number)
            .and_then(|round| {
                round
                    .questions
                    .iter()
                    .position(|question| question.question_id == live.question.id)
            })
            .unwrap_or_default();
        Self {
            question_id: live.question.id,
            round_number: live.round_number,
            question_index,
            text: live.question.text.clone(),
            category: live.question.category.clone(),
            difficulty: live.question.difficulty.clone(),
            kind: live.question.answer.kind().to_string(),
            options: live.question.answer.options().to_vec(),
            time_limit_seconds: u32::try_from(live.countdown.time_limit().as_secs())
                .unwrap_or(u32::MAX),
            remaining_ms: duration_ms(live.countdown.remaining(now)),
            paused: live.countdown.is_paused(),
        }
    }
}

pub(crate) fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Payload of `player:joined`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedEvent {
    /// Joining player.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Players in the session after the join.
    pub player_count: usize,
}

/// Payload of `player:left`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftEvent {
    /// Departing player.
    pub player_id: String,
    /// `left` or `disconnected`.
    pub reason: String,
}

/// Payload of `player:disconnected`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDisconnectedEvent {
    /// Dropped identity.
    pub player_id: String,
    /// Whether the host dropped.
    pub is_host: bool,
    /// Seconds the seat is held.
    pub grace_seconds: u64,
}

/// Payload of `player:reconnected`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReconnectedEvent {
    /// Returning identity.
    pub player_id: String,
    /// Whether the host came back.
    pub is_host: bool,
}

/// Payload of `game:started`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedEvent {
    /// RFC 3339 start time.
    pub started_at: String,
    /// Players taking part.
    pub player_count: usize,
}

/// Payload of `game:paused`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GamePausedEvent {
    /// Why the game paused.
    pub reason: String,
    /// RFC 3339 pause time.
    pub paused_at: String,
    /// Frozen time of the open question.
    pub remaining_ms: Option<u64>,
}

/// Payload of `game:resumed`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameResumedEvent {
    /// Time left on the reopened question clock.
    pub remaining_ms: Option<u64>,
}

/// Payload of `game:ended`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedEvent {
    /// Why the game ended.
    pub reason: String,
    /// Final ranking.
    pub standings: Vec<Standing>,
    /// Rounds started during the game.
    pub rounds_played: u32,
    /// Questions asked during the game.
    pub questions_asked: u32,
}

/// Payload of `round:started`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartedEvent {
    /// 1-based round number.
    pub round_number: u32,
    /// Scoring policy.
    pub round_type: RoundType,
    /// Display title.
    pub title: String,
    /// Resolved settings.
    pub settings: RoundSettings,
}

/// One line of a round summary, ranked by points gained during the round.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    /// Player identity.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Points gained during the round.
    pub round_score: i32,
    /// Correct answers in the round.
    pub correct: u32,
    /// Incorrect answers in the round.
    pub incorrect: u32,
    /// Mean response time over the round's answers.
    pub average_response_ms: Option<u64>,
    /// 1-based rank by round score.
    pub rank: u32,
}

/// Payload of `round:ended`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundEndedEvent {
    /// Round that ended.
    pub round_number: u32,
    /// Ranked per-player results.
    pub summary: Vec<RoundResult>,
}

/// Payload of `question:timeUp`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTimeUpEvent {
    /// Question whose clock ran out.
    pub question_id: Uuid,
    /// Answer key, revealed on expiry.
    pub correct_answer: AnswerKey,
}

/// Payload of `question:reveal`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRevealEvent {
    /// Revealed question.
    pub question_id: Uuid,
    /// Answer key, when the catalog still has the question.
    pub correct_answer: Option<AnswerKey>,
    /// Aggregated results.
    pub results: RevealSummary,
}

/// Payload of `answer:confirmed`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerConfirmedEvent {
    /// Question answered.
    pub question_id: Uuid,
    /// Whether the answer counts as correct.
    pub is_correct: bool,
    /// Points earned for it.
    pub points_earned: i32,
    /// Player total.
    pub total_score: i32,
    /// Set when the host graded the answer.
    pub overridden: bool,
}

/// Payload of `answer:received`, host only.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReceivedEvent {
    /// Player who answered.
    pub player_id: String,
    /// Question answered.
    pub question_id: Uuid,
    /// Answers recorded so far.
    pub answered_count: usize,
    /// Active players.
    pub total_players: usize,
}

/// Payload of `player:buzzed`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerBuzzedEvent {
    /// Player who buzzed.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Question buzzed for.
    pub question_id: Uuid,
    /// 1-based buzz position.
    pub position: usize,
}

/// Payload of `buzzer:first`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerFirstEvent {
    /// Fastest player.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Question buzzed for.
    pub question_id: Uuid,
}

/// `error` event sent to the originating connection only.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// RFC 3339 time of the failure.
    pub timestamp: String,
    /// Seconds until a rate-limited event is admitted again.
    pub retry_after: Option<u64>,
    /// Debug rendering of the failure, only outside production.
    pub details: Option<String>,
}
