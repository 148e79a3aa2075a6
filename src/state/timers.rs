//! Cancellable scheduled callbacks with replace-on-rearm semantics, plus the
//! pausable countdown used for question and round clocks.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::debug;
use uuid::Uuid;

/// What a scheduled callback is attached to. At most one task exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Active question expiry of a session.
    Question(Uuid),
    /// Round time limit of a session.
    Round(Uuid),
    /// Reconnection grace window of one identity in one session.
    Grace {
        /// Session the identity belongs to.
        session_id: Uuid,
        /// Dropped identity.
        player_id: String,
    },
}

struct ScheduledTask {
    token: u64,
    handle: JoinHandle<()>,
}

/// Keyed registry of pending timer tasks.
#[derive(Default)]
pub struct TimerService {
    tasks: Arc<DashMap<TimerKey, ScheduledTask>>,
    next_token: AtomicU64,
}

impl TimerService {
    /// Service with no task scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, cancelling whatever was scheduled under `key`.
    ///
    /// A task only runs its callback if it still owns the key when the delay
    /// elapses, so a superseded task never fires.
    pub fn schedule<F, Fut>(&self, key: TimerKey, delay: Duration, callback: F) -> u64
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        // The deadline is fixed now, not when the task is first polled.
        let deadline = Instant::now() + delay;

        // Hold the entry while spawning so a zero-delay task cannot look the key
        // up before its own registration lands.
        let entry = self.tasks.entry(key.clone());
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            let owned = tasks
                .remove_if(&key, |_, task| task.token == token)
                .is_some();
            if owned {
                callback().await;
            } else {
                debug!(?key, token, "timer superseded before firing");
            }
        });

        match entry {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(ScheduledTask { token, handle });
                previous.handle.abort();
            }
            Entry::Vacant(slot) => {
                slot.insert(ScheduledTask { token, handle });
            }
        }
        token
    }

    /// Cancel the task under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        match self.tasks.remove(key) {
            Some((_, task)) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every task belonging to a session.
    pub fn cancel_session(&self, session_id: Uuid) {
        self.tasks.retain(|key, task| {
            let owned = match key {
                TimerKey::Question(id) | TimerKey::Round(id) => *id == session_id,
                TimerKey::Grace { session_id: id, .. } => *id == session_id,
            };
            if owned {
                task.handle.abort();
            }
            !owned
        });
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, key: &TimerKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of scheduled tasks.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

/// Countdown that can be frozen and resumed, measured on the tokio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    started_at: Instant,
    time_limit: Duration,
    ends_at: Instant,
    paused_remaining: Option<Duration>,
    // Accumulated time spent paused.
    paused_for: Duration,
    paused_at: Option<Instant>,
}

impl Countdown {
    /// Countdown of `time_limit` starting at `now`.
    pub fn start(now: Instant, time_limit: Duration) -> Self {
        Self {
            started_at: now,
            time_limit,
            ends_at: now + time_limit,
            paused_remaining: None,
            paused_for: Duration::ZERO,
            paused_at: None,
        }
    }

    /// Full limit the countdown started with.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Whether the countdown is frozen.
    pub fn is_paused(&self) -> bool {
        self.paused_remaining.is_some()
    }

    /// Time left before expiry.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.paused_remaining {
            Some(remaining) => remaining,
            None => self.ends_at.saturating_duration_since(now),
        }
    }

    /// Running time since the start, paused time excluded.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let reference = self.paused_at.unwrap_or(now);
        reference
            .saturating_duration_since(self.started_at)
            .saturating_sub(self.paused_for)
    }

    /// Freeze the countdown. Returns the remaining time.
    pub fn pause(&mut self, now: Instant) -> Duration {
        if let Some(remaining) = self.paused_remaining {
            return remaining;
        }
        let remaining = self.ends_at.saturating_duration_since(now);
        self.paused_remaining = Some(remaining);
        self.paused_at = Some(now);
        remaining
    }

    /// Restart from the frozen remaining time; the new end is `now + remaining`.
    pub fn resume(&mut self, now: Instant) -> Duration {
        let Some(remaining) = self.paused_remaining.take() else {
            return self.remaining(now);
        };
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_for += now.saturating_duration_since(paused_at);
        }
        self.ends_at = now + remaining;
        remaining
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::{advance, sleep};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_previous_task() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let session = Uuid::new_v4();

        for label in [1, 10] {
            let fired = fired.clone();
            timers.schedule(TimerKey::Question(session), Duration::from_secs(5), move || async move {
                fired.fetch_add(label, Ordering::SeqCst);
            });
        }

        advance(Duration::from_secs(6)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!timers.is_scheduled(&TimerKey::Question(session)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_from_the_schedule_call() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let session = Uuid::new_v4();
        let counter = fired.clone();
        timers.schedule(TimerKey::Question(session), Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // The clock moves before the spawned task ever runs.
        advance(Duration::from_secs(5)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_fires() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let session = Uuid::new_v4();
        let counter = fired.clone();
        timers.schedule(TimerKey::Round(session), Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timers.cancel_session(session);

        advance(Duration::from_secs(2)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_pause_and_resume_shift_the_end() {
        let start = Instant::now();
        let mut countdown = Countdown::start(start, Duration::from_secs(30));

        advance(Duration::from_secs(10)).await;
        assert_eq!(countdown.pause(Instant::now()), Duration::from_secs(20));

        advance(Duration::from_secs(60)).await;
        assert_eq!(countdown.remaining(Instant::now()), Duration::from_secs(20));
        assert_eq!(countdown.elapsed(Instant::now()), Duration::from_secs(10));

        assert_eq!(countdown.resume(Instant::now()), Duration::from_secs(20));
        advance(Duration::from_secs(5)).await;
        assert_eq!(countdown.remaining(Instant::now()), Duration::from_secs(15));
        assert_eq!(countdown.elapsed(Instant::now()), Duration::from_secs(15));
    }
}
