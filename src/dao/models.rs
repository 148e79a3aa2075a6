use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    ledger::AnswerRecord,
    rounds::RoundType,
    session::{GameSession, PlayerEntry, Round, SessionSettings, SessionStatus},
};

/// Persisted form of a game session, replaced atomically on every save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Human-shareable join code, unique across sessions.
    pub code: String,
    /// Identity allowed to issue host events.
    pub host_id: String,
    /// Lifecycle status at the time of the save.
    pub status: SessionStatus,
    /// Round currently in progress or last played.
    pub current_round_number: Option<u32>,
    /// Index of the current question inside the current round.
    pub current_question_index: Option<usize>,
    /// Session-wide settings.
    pub settings: SessionSettings,
    /// Rounds in play order.
    pub rounds: Vec<Round>,
    /// Player entries in join order.
    pub players: Vec<PlayerEntry>,
    /// Every accepted answer record.
    pub answers: Vec<AnswerRecord>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Set when the host starts the game.
    pub started_at: Option<SystemTime>,
    /// Set while the game is paused.
    pub paused_at: Option<SystemTime>,
    /// Set once the game completes.
    pub ended_at: Option<SystemTime>,
    /// Last mutation timestamp.
    pub updated_at: SystemTime,
}

impl From<GameSession> for SessionEntity {
    fn from(session: GameSession) -> Self {
        Self {
            id: session.id,
            code: session.code,
            host_id: session.host_id,
            status: session.status,
            current_round_number: session.current_round_number,
            current_question_index: session.current_question_index,
            settings: session.settings,
            rounds: session.rounds,
            players: session.players.into_values().collect(),
            answers: session.answers.into_records(),
            created_at: session.created_at,
            started_at: session.started_at,
            paused_at: session.paused_at,
            ended_at: session.ended_at,
            updated_at: session.updated_at,
        }
    }
}

impl From<SessionEntity> for GameSession {
    fn from(entity: SessionEntity) -> Self {
        Self {
            id: entity.id,
            code: entity.code,
            host_id: entity.host_id,
            status: entity.status,
            current_round_number: entity.current_round_number,
            current_question_index: entity.current_question_index,
            settings: entity.settings,
            rounds: entity.rounds,
            players: entity
                .players
                .into_iter()
                .map(|player| (player.player_id.clone(), player))
                .collect(),
            answers: entity.answers.into_iter().collect(),
            created_at: entity.created_at,
            started_at: entity.started_at,
            paused_at: entity.paused_at,
            ended_at: entity.ended_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Question as stored in the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEntity {
    /// Catalog identifier.
    pub id: Uuid,
    /// Prompt shown to players.
    pub text: String,
    /// Category used for filtering and specialist matching.
    pub category: String,
    /// Free-form difficulty label (`easy`, `medium`, ...).
    pub difficulty: String,
    /// Round types this question may be used in; empty means any.
    #[serde(default)]
    pub round_types: Vec<RoundType>,
    /// Expected answer.
    pub answer: AnswerKey,
}

/// Expected answer for a catalog question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerKey {
    /// Free-text answer, matched case-insensitively against any accepted form.
    Text {
        /// Accepted spellings.
        accepted: Vec<String>,
    },
    /// Single choice among options, matched by index.
    MultipleChoice {
        /// Displayed options.
        options: Vec<String>,
        /// Index of the correct option.
        correct_index: usize,
    },
    /// Several options must be selected, order ignored.
    MultiSelect {
        /// Displayed options.
        options: Vec<String>,
        /// Indices of every correct option.
        correct_indices: Vec<usize>,
    },
}

impl AnswerKey {
    /// Options shown to players, empty for free-text questions.
    pub fn options(&self) -> &[String] {
        match self {
            AnswerKey::Text { .. } => &[],
            AnswerKey::MultipleChoice { options, .. } | AnswerKey::MultiSelect { options, .. } => {
                options
            }
        }
    }

    /// Kind label exposed with a question.
    pub fn kind(&self) -> &'static str {
        match self {
            AnswerKey::Text { .. } => "text",
            AnswerKey::MultipleChoice { .. } => "multiple_choice",
            AnswerKey::MultiSelect { .. } => "multi_select",
        }
    }
}

/// Criteria for picking the next unused catalog question.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    /// Restrict to this category.
    pub category: Option<String>,
    /// Restrict to this difficulty.
    pub difficulty: Option<String>,
    /// Round type the question will be played in.
    pub round_type: Option<RoundType>,
    /// Questions already asked in the session.
    pub exclude: Vec<Uuid>,
}

/// Player profile held by the external player directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfileEntity {
    /// Persistent player identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Declared subject of expertise for specialist rounds.
    pub specialist_subject: Option<String>,
}

/// Final standing of one player in a completed game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandingEntity {
    /// Player identity.
    pub player_id: String,
    /// Display name at the end of the game.
    pub name: String,
    /// Final score.
    pub score: i32,
    /// Final rank, ties share a rank.
    pub rank: u32,
}

/// History record appended once a game completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameHistoryEntity {
    /// Session primary key.
    pub session_id: Uuid,
    /// Join code used during the game.
    pub code: String,
    /// Host identity.
    pub host_id: String,
    /// Why the game ended.
    pub reason: String,
    /// Number of rounds that completed.
    pub rounds_played: u32,
    /// Number of questions asked.
    pub questions_asked: u32,
    /// Start timestamp, if the game ever started.
    pub started_at: Option<SystemTime>,
    /// Completion timestamp.
    pub ended_at: SystemTime,
    /// Final standings in rank order.
    pub standings: Vec<StandingEntity>,
}
