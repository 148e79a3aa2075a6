use tokio::time::Instant;
use uuid::Uuid;

/// One buzz-in of a player for a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuzzerEntry {
    /// Who buzzed.
    pub player_id: String,
    /// Question the buzz belongs to.
    pub question_id: Uuid,
    /// Arrival time on the server clock.
    pub buzzed_at: Instant,
    // Arrival order, breaks ties between identical timestamps.
    sequence: u64,
}

/// Outcome of [`BuzzerQueue::activate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuzzOutcome {
    /// 1-based position among the buzzes for the question.
    pub position: usize,
    /// False when the player had already buzzed for this question.
    pub newly_added: bool,
}

/// Time-ordered buzz-ins of one session, deduplicated per player and question.
#[derive(Debug, Default)]
pub struct BuzzerQueue {
    entries: Vec<BuzzerEntry>,
    next_sequence: u64,
}

impl BuzzerQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buzz-in and report its position. A repeated buzz keeps the
    /// player's first position.
    pub fn activate(&mut self, player_id: &str, question_id: Uuid, buzzed_at: Instant) -> BuzzOutcome {
        if let Some(position) = self.position(player_id, question_id) {
            return BuzzOutcome {
                position,
                newly_added: false,
            };
        }

        self.entries.push(BuzzerEntry {
            player_id: player_id.to_string(),
            question_id,
            buzzed_at,
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        self.entries
            .sort_by(|a, b| (a.buzzed_at, a.sequence).cmp(&(b.buzzed_at, b.sequence)));

        BuzzOutcome {
            position: self.position(player_id, question_id).unwrap_or(self.entries.len()),
            newly_added: true,
        }
    }

    /// 1-based position of a player's buzz for a question.
    pub fn position(&self, player_id: &str, question_id: Uuid) -> Option<usize> {
        self.entries_for(question_id)
            .position(|entry| entry.player_id == player_id)
            .map(|index| index + 1)
    }

    /// Entries of one question, earliest first.
    pub fn entries_for(&self, question_id: Uuid) -> impl Iterator<Item = &BuzzerEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.question_id == question_id)
    }

    /// Forget every buzz, e.g. when the next question opens.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether no buzz is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn entries_are_time_ordered_and_deduplicated() {
        let mut queue = BuzzerQueue::new();
        let question = Uuid::new_v4();
        let t0 = Instant::now();

        assert_eq!(queue.activate("late", question, t0 + Duration::from_millis(30)).position, 1);
        // An earlier timestamp arriving later still takes the lead.
        let early = queue.activate("early", question, t0 + Duration::from_millis(10));
        assert_eq!(early, BuzzOutcome { position: 1, newly_added: true });
        assert_eq!(queue.position("late", question), Some(2));

        let again = queue.activate("late", question, t0);
        assert_eq!(again, BuzzOutcome { position: 2, newly_added: false });
        assert_eq!(queue.entries_for(question).count(), 2);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut queue = BuzzerQueue::new();
        let question = Uuid::new_v4();
        let t0 = Instant::now();
        queue.activate("a", question, t0);
        queue.activate("b", question, t0);
        assert_eq!(queue.position("a", question), Some(1));
        assert_eq!(queue.position("b", question), Some(2));
    }

    #[test]
    fn positions_are_per_question_and_clear_empties() {
        let mut queue = BuzzerQueue::new();
        let (q1, q2) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Instant::now();
        queue.activate("a", q1, t0);
        assert_eq!(queue.activate("a", q2, t0).position, 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
