//! Typed registry of live sessions. Each session owns its runtime behind one
//! async mutex, held across the full read-modify-write of every mutation.

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{game_store::GameStore, models::QuestionEntity},
    error::ServiceError,
    state::{
        buzzer::BuzzerQueue,
        session::{GameSession, SessionStatus},
        state_machine::{SessionEvent, SessionStateMachine},
        timers::Countdown,
    },
};

/// Question currently open, with its pausable clock.
#[derive(Debug, Clone)]
pub struct LiveQuestion {
    /// Question being asked.
    pub question: QuestionEntity,
    /// Round it belongs to.
    pub round_number: u32,
    /// Answer clock.
    pub countdown: Countdown,
}

/// Round time limit clock.
#[derive(Debug, Clone, Copy)]
pub struct RoundClock {
    /// Round the clock runs for.
    pub round_number: u32,
    /// Remaining round time.
    pub countdown: Countdown,
}

/// Everything a live session needs besides its persisted aggregate.
#[derive(Debug)]
pub struct SessionRuntime {
    /// Authoritative session aggregate. Persisted on every commit.
    pub session: GameSession,
    /// Lifecycle position, kept in step with `session.status`.
    pub lifecycle: SessionStateMachine,
    /// Buzz-ins of the live question.
    pub buzzer: BuzzerQueue,
    /// Open question, if any.
    pub live_question: Option<LiveQuestion>,
    /// Running round clock when the round has a time limit.
    pub round_clock: Option<RoundClock>,
    /// Set once the session is torn down. A closed runtime accepts no writes.
    closed: bool,
}

impl SessionRuntime {
    /// Runtime around a freshly created or loaded session.
    pub fn new(session: GameSession) -> Self {
        let lifecycle = SessionStateMachine::from_status(session.status);
        Self {
            session,
            lifecycle,
            buzzer: BuzzerQueue::new(),
            live_question: None,
            round_clock: None,
            closed: false,
        }
    }

    /// Mark the runtime as torn down. Handlers still queued on its lock see
    /// the session as gone.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<(), ServiceError> {
        if self.closed {
            Err(ServiceError::NotFound(format!(
                "session `{}` is closed",
                self.session.code
            )))
        } else {
            Ok(())
        }
    }

    /// Persist `draft` and only then make it the in-memory session.
    pub async fn commit(
        &mut self,
        store: &Arc<dyn GameStore>,
        mut draft: GameSession,
    ) -> Result<(), ServiceError> {
        self.ensure_open()?;
        draft.updated_at = SystemTime::now();
        store.save_session(draft.clone().into()).await?;
        self.session = draft;
        Ok(())
    }

    /// Run a lifecycle transition: plan it, let `work` prepare the draft,
    /// persist, then apply. Any failure aborts the plan and leaves the
    /// in-memory session untouched.
    pub async fn run_transition<F, T>(
        &mut self,
        store: &Arc<dyn GameStore>,
        event: SessionEvent,
        work: F,
    ) -> Result<(T, SessionStatus), ServiceError>
    where
        F: FnOnce(&mut GameSession) -> Result<T, ServiceError>,
    {
        self.ensure_open()?;
        let plan = self.lifecycle.plan(event.clone())?;

        let mut draft = self.session.clone();
        draft.status = plan.to;
        draft.updated_at = SystemTime::now();

        let prepared = work(&mut draft);
        let value = match prepared {
            Ok(value) => value,
            Err(err) => {
                self.abort_plan(plan.id, &event);
                return Err(err);
            }
        };

        if let Err(err) = store.save_session(draft.clone().into()).await {
            self.abort_plan(plan.id, &event);
            return Err(err.into());
        }

        let next = self.lifecycle.apply(plan.id)?;
        self.session = draft;
        Ok((value, next))
    }

    fn abort_plan(&mut self, plan_id: Uuid, event: &SessionEvent) {
        if let Err(abort_err) = self.lifecycle.abort(plan_id) {
            warn!(
                event = ?event,
                plan_id = %plan_id,
                error = ?abort_err,
                "failed to abort session transition"
            );
        }
    }
}

/// Shared handle to one live session.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session id.
    pub id: Uuid,
    /// Join code.
    pub code: String,
    runtime: Mutex<SessionRuntime>,
}

impl SessionHandle {
    /// Raw lock over the runtime. Handlers use [`SessionHandle::lock_open`].
    pub fn runtime(&self) -> &Mutex<SessionRuntime> {
        &self.runtime
    }

    /// Lock the runtime, failing with `NotFound` if the session was torn down
    /// while waiting for the lock.
    pub async fn lock_open(&self) -> Result<MutexGuard<'_, SessionRuntime>, ServiceError> {
        let runtime = self.runtime.lock().await;
        runtime.ensure_open()?;
        Ok(runtime)
    }
}

/// Live sessions keyed by join code.
#[derive(Default)]
pub struct SessionRegistry {
    by_code: DashMap<String, Arc<SessionHandle>>,
    by_id: DashMap<Uuid, String>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime. If the code is already live, the existing handle wins.
    pub fn insert(&self, runtime: SessionRuntime) -> Arc<SessionHandle> {
        let id = runtime.session.id;
        let code = runtime.session.code.clone();
        let handle = self
            .by_code
            .entry(code.clone())
            .or_insert_with(|| {
                Arc::new(SessionHandle {
                    id,
                    code: code.clone(),
                    runtime: Mutex::new(runtime),
                })
            })
            .clone();
        self.by_id.insert(handle.id, handle.code.clone());
        handle
    }

    /// Handle by join code.
    pub fn get(&self, code: &str) -> Option<Arc<SessionHandle>> {
        self.by_code.get(code).map(|entry| entry.clone())
    }

    /// Handle by session id.
    pub fn get_by_id(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        let code = self.by_id.get(&id).map(|entry| entry.clone())?;
        self.get(&code)
    }

    /// Tear a session down. Only removes the handle registered for `id`.
    pub fn remove(&self, code: &str, id: Uuid) -> Option<Arc<SessionHandle>> {
        let (_, handle) = self.by_code.remove_if(code, |_, handle| handle.id == id)?;
        self.by_id.remove(&id);
        Some(handle)
    }

    /// Join codes of every live session.
    pub fn codes(&self) -> Vec<String> {
        self.by_code.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::memory::MemoryGameStore,
        state::session::{PlayerEntry, SessionSettings},
    };

    fn runtime(code: &str) -> SessionRuntime {
        SessionRuntime::new(GameSession::new(
            code.into(),
            "host".into(),
            SessionSettings::default(),
            SystemTime::now(),
        ))
    }

    #[tokio::test]
    async fn failed_save_leaves_memory_and_store_aligned() {
        let memory = MemoryGameStore::new();
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());
        let mut runtime = runtime("ABC123");
        store
            .create_session(runtime.session.clone().into())
            .await
            .unwrap();

        memory.set_unavailable(true);
        let err = runtime
            .run_transition(&store, SessionEvent::PlayerJoined, |draft| {
                draft.players.insert(
                    "p1".into(),
                    PlayerEntry::new("p1".into(), "P1".into(), None, SystemTime::now()),
                );
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        assert_eq!(runtime.session.status, SessionStatus::Created);
        assert!(runtime.session.players.is_empty());
        assert_eq!(runtime.lifecycle.status(), SessionStatus::Created);

        let persisted = memory.stored_session(runtime.session.id).unwrap();
        assert_eq!(persisted.status, SessionStatus::Created);
        assert!(persisted.players.is_empty());

        memory.set_unavailable(false);
        let (_, status) = runtime
            .run_transition(&store, SessionEvent::PlayerJoined, |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Lobby);
        assert_eq!(
            memory.stored_session(runtime.session.id).unwrap().status,
            SessionStatus::Lobby
        );
    }

    #[tokio::test]
    async fn failing_commit_keeps_the_previous_session() {
        let memory = MemoryGameStore::new();
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());
        let mut runtime = runtime("ABC123");
        let mut draft = runtime.session.clone();
        draft.settings.max_players = 2;

        memory.set_unavailable(true);
        assert!(runtime.commit(&store, draft.clone()).await.is_err());
        assert_eq!(runtime.session.settings.max_players, 50);

        memory.set_unavailable(false);
        runtime.commit(&store, draft).await.unwrap();
        assert_eq!(runtime.session.settings.max_players, 2);
    }

    #[tokio::test]
    async fn closed_runtime_refuses_writes() {
        let memory = MemoryGameStore::new();
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());
        let registry = SessionRegistry::new();
        let handle = registry.insert(runtime("ABC123"));

        let mut guard = handle.lock_open().await.unwrap();
        guard.close();
        let draft = guard.session.clone();
        let err = guard.commit(&store, draft).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = guard
            .run_transition(&store, SessionEvent::PlayerJoined, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        drop(guard);

        assert!(matches!(
            handle.lock_open().await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(memory.stored_session(handle.id).is_none());
    }

    #[test]
    fn registry_removal_checks_the_session_id() {
        let registry = SessionRegistry::new();
        let handle = registry.insert(runtime("ABC123"));
        assert!(registry.get_by_id(handle.id).is_some());
        assert!(registry.remove("ABC123", Uuid::new_v4()).is_none());
        assert!(registry.remove("ABC123", handle.id).is_some());
        assert!(registry.is_empty());
    }
}
