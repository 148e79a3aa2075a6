use std::{
    collections::BTreeMap,
    time::SystemTime,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    ledger::AnswerLedger,
    rounds::{RoundSettings, RoundType},
};

/// Lifecycle status of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created by the host, nobody joined yet.
    Created,
    /// At least one player joined, waiting for the host to start.
    Lobby,
    /// Game in progress.
    Active,
    /// Game temporarily halted, question timers frozen.
    Paused,
    /// Terminal state.
    Completed,
}

impl SessionStatus {
    /// Whether the game has been started at some point.
    pub fn has_started(self) -> bool {
        matches!(
            self,
            SessionStatus::Active | SessionStatus::Paused | SessionStatus::Completed
        )
    }
}

/// Session-wide settings chosen by the host at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Upper bound on player entries.
    pub max_players: u32,
    /// Whether the session is listed publicly.
    pub public_game: bool,
    /// Whether players may join once the game started.
    pub allow_join_after_start: bool,
    /// Maximum number of questions asked over the whole session.
    pub question_pool_size: u32,
    /// Number of rounds after which the game ends on its own.
    pub round_count: Option<u32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_players: 50,
            public_game: false,
            allow_join_after_start: true,
            question_pool_size: 50,
            round_count: None,
        }
    }
}

/// Question asked during a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRef {
    /// Catalog question id.
    pub question_id: Uuid,
    /// Catalog category, kept for specialist scoring on later overrides.
    pub category: String,
    /// When the question was opened.
    pub start_time: SystemTime,
    /// Answer window in seconds.
    pub time_limit_seconds: u32,
    /// Whether answers are still accepted.
    pub active: bool,
    /// Whether the correct answer was shown.
    pub revealed: bool,
}

/// Scored phase of the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number.
    pub round_number: u32,
    /// Scoring policy.
    pub round_type: RoundType,
    /// Display title.
    pub title: String,
    /// Settings resolved when the round started.
    pub settings: RoundSettings,
    /// Questions asked so far, in order.
    pub questions: Vec<QuestionRef>,
    /// Set once the round ended.
    pub completed: bool,
    /// When the round started.
    pub start_time: Option<SystemTime>,
    /// When the round ended.
    pub end_time: Option<SystemTime>,
    /// Player scores captured when the round started.
    pub baseline_scores: BTreeMap<String, i32>,
}

impl Round {
    /// The question currently open for answers, if any.
    pub fn active_question(&self) -> Option<&QuestionRef> {
        self.questions.iter().find(|question| question.active)
    }

    /// Question of this round by id.
    pub fn question_mut(&mut self, question_id: Uuid) -> Option<&mut QuestionRef> {
        self.questions
            .iter_mut()
            .find(|question| question.question_id == question_id)
    }
}

/// Per-round counters kept on each player entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    /// Answers recorded.
    pub answered: u32,
    /// Correct answers.
    pub correct: u32,
    /// Incorrect answers.
    pub incorrect: u32,
    /// Quickest correct response.
    pub fastest_response_ms: Option<u64>,
    /// Sum of response times, for averages.
    pub total_response_ms: u64,
}

/// Participant of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    /// Persistent identity.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Category that doubles points in specialist rounds.
    pub specialist_subject: Option<String>,
    /// Running total.
    pub score: i32,
    /// Rank among all players, ties share a rank.
    pub position: u32,
    /// False while the player is away or after leaving.
    pub active: bool,
    /// Lobby ready flag.
    pub ready: bool,
    /// When the player first joined.
    pub joined_at: SystemTime,
    /// Stats by round number.
    pub round_stats: BTreeMap<u32, RoundStats>,
}

impl PlayerEntry {
    /// Fresh entry with a zero score.
    pub fn new(
        player_id: String,
        name: String,
        specialist_subject: Option<String>,
        joined_at: SystemTime,
    ) -> Self {
        Self {
            player_id,
            name,
            specialist_subject,
            score: 0,
            position: 0,
            active: true,
            ready: false,
            joined_at,
            round_stats: BTreeMap::new(),
        }
    }
}

/// Final or intermediate ranking line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    /// Player identity.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Score at the time of ranking.
    pub score: i32,
    /// 1-based rank. Ties share a rank.
    pub rank: u32,
}

/// In-memory aggregate for one live game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSession {
    /// Session id.
    pub id: Uuid,
    /// Six-character join code.
    pub code: String,
    /// Identity of the host.
    pub host_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Round in progress or last played.
    pub current_round_number: Option<u32>,
    /// Index of the open question within the current round.
    pub current_question_index: Option<usize>,
    /// Host-chosen settings.
    pub settings: SessionSettings,
    /// Rounds in play order.
    pub rounds: Vec<Round>,
    /// Player entries in join order.
    pub players: IndexMap<String, PlayerEntry>,
    /// Accepted answers of the whole game.
    pub answers: AnswerLedger,
    /// Creation time.
    pub created_at: SystemTime,
    /// When the host started the game.
    pub started_at: Option<SystemTime>,
    /// When the current pause began.
    pub paused_at: Option<SystemTime>,
    /// When the game ended.
    pub ended_at: Option<SystemTime>,
    /// Last persisted change.
    pub updated_at: SystemTime,
}

impl GameSession {
    /// New session in the `created` state.
    pub fn new(code: String, host_id: String, settings: SessionSettings, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            host_id,
            status: SessionStatus::Created,
            current_round_number: None,
            current_question_index: None,
            settings,
            rounds: Vec::new(),
            players: IndexMap::new(),
            answers: AnswerLedger::default(),
            created_at: now,
            started_at: None,
            paused_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Whether `identity` hosts the session.
    pub fn is_host(&self, identity: &str) -> bool {
        self.host_id == identity
    }

    /// Round by number.
    pub fn round(&self, round_number: u32) -> Option<&Round> {
        self.rounds
            .iter()
            .find(|round| round.round_number == round_number)
    }

    /// Mutable round by number.
    pub fn round_mut(&mut self, round_number: u32) -> Option<&mut Round> {
        self.rounds
            .iter_mut()
            .find(|round| round.round_number == round_number)
    }

    /// Round in progress.
    pub fn current_round(&self) -> Option<&Round> {
        self.current_round_number
            .and_then(|number| self.round(number))
    }

    /// Mutable round in progress.
    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        let number = self.current_round_number?;
        self.round_mut(number)
    }

    /// Round and question currently open for answers.
    pub fn active_question(&self) -> Option<(&Round, &QuestionRef)> {
        self.rounds
            .iter()
            .find_map(|round| round.active_question().map(|question| (round, question)))
    }

    /// Round a question was asked in.
    pub fn round_of_question(&self, question_id: Uuid) -> Option<&Round> {
        self.rounds.iter().find(|round| {
            round
                .questions
                .iter()
                .any(|question| question.question_id == question_id)
        })
    }

    /// Every question id asked so far, in play order.
    pub fn asked_question_ids(&self) -> Vec<Uuid> {
        self.rounds
            .iter()
            .flat_map(|round| round.questions.iter().map(|question| question.question_id))
            .collect()
    }

    /// Players currently taking part.
    pub fn active_player_count(&self) -> usize {
        self.players.values().filter(|player| player.active).count()
    }

    /// Close the open question, if any, without revealing it.
    pub fn deactivate_questions(&mut self) {
        for round in &mut self.rounds {
            for question in &mut round.questions {
                question.active = false;
            }
        }
    }

    /// Add `delta` to a player's score. Returns the new total.
    pub fn apply_score_delta(&mut self, player_id: &str, delta: i32) -> Option<i32> {
        let player = self.players.get_mut(player_id)?;
        player.score = player.score.saturating_add(delta);
        Some(player.score)
    }

    /// Standings over cumulative score, ties share a rank.
    pub fn rankings(&self) -> Vec<Standing> {
        let mut ordered: Vec<&PlayerEntry> = self.players.values().collect();
        // Stable sort keeps join order between equal scores.
        ordered.sort_by(|a, b| b.score.cmp(&a.score));
        let scores: Vec<i32> = ordered.iter().map(|player| player.score).collect();
        ordered
            .into_iter()
            .zip(competition_ranks(&scores))
            .map(|(player, rank)| Standing {
                player_id: player.player_id.clone(),
                name: player.name.clone(),
                score: player.score,
                rank,
            })
            .collect()
    }

    /// Refresh every player's `position` from the current scores.
    pub fn recompute_positions(&mut self) {
        for standing in self.rankings() {
            if let Some(player) = self.players.get_mut(&standing.player_id) {
                player.position = standing.rank;
            }
        }
    }

    /// Rebuild one player's counters for a round from the ledger.
    pub fn refresh_round_stats(&mut self, player_id: &str, round_number: u32) {
        let mut stats = RoundStats::default();
        for record in self
            .answers
            .records()
            .filter(|record| record.player_id == player_id && record.round_number == round_number)
        {
            stats.answered += 1;
            if record.is_correct {
                stats.correct += 1;
            } else {
                stats.incorrect += 1;
            }
            if !record.timed_out && !record.overridden {
                stats.total_response_ms += record.response_time_ms;
                stats.fastest_response_ms = Some(match stats.fastest_response_ms {
                    Some(fastest) => fastest.min(record.response_time_ms),
                    None => record.response_time_ms,
                });
            }
        }
        if let Some(player) = self.players.get_mut(player_id) {
            player.round_stats.insert(round_number, stats);
        }
    }
}

/// Standard competition ranks ("1224") for scores sorted in descending order.
pub fn competition_ranks(sorted_scores: &[i32]) -> Vec<u32> {
    let mut ranks: Vec<u32> = Vec::with_capacity(sorted_scores.len());
    for (index, score) in sorted_scores.iter().enumerate() {
        let rank = match index.checked_sub(1) {
            Some(previous) if sorted_scores[previous] == *score => ranks[previous],
            _ => index as u32 + 1,
        };
        ranks.push(rank);
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_scores(scores: &[(&str, i32)]) -> GameSession {
        let now = SystemTime::now();
        let mut session = GameSession::new("ABC123".into(), "host".into(), Default::default(), now);
        for (id, score) in scores {
            let mut entry = PlayerEntry::new((*id).into(), id.to_uppercase(), None, now);
            entry.score = *score;
            session.players.insert((*id).into(), entry);
        }
        session
    }

    #[test]
    fn equal_scores_share_rank_and_next_rank_skips() {
        assert_eq!(competition_ranks(&[30, 20, 20, 10]), vec![1, 2, 2, 4]);
        assert_eq!(competition_ranks(&[5, 5, 5]), vec![1, 1, 1]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn rankings_follow_score_and_keep_join_order_on_ties() {
        let mut session = session_with_scores(&[("a", 10), ("b", 25), ("c", 10)]);
        let standings = session.rankings();
        let order: Vec<(&str, u32)> = standings
            .iter()
            .map(|standing| (standing.player_id.as_str(), standing.rank))
            .collect();
        assert_eq!(order, vec![("b", 1), ("a", 2), ("c", 2)]);

        session.recompute_positions();
        assert_eq!(session.players["c"].position, 2);
        assert_eq!(session.players["b"].position, 1);
    }

    #[test]
    fn lower_score_ranks_strictly_after_a_tie() {
        let session = session_with_scores(&[("a", 7), ("b", 7), ("c", 3)]);
        let standings = session.rankings();
        assert_eq!(standings[0].rank, standings[1].rank);
        assert!(standings[2].rank > standings[0].rank);
    }

    #[test]
    fn score_delta_can_go_negative() {
        let mut session = session_with_scores(&[("a", 1)]);
        assert_eq!(session.apply_score_delta("a", -3), Some(-2));
        assert_eq!(session.apply_score_delta("ghost", 5), None);
    }
}
