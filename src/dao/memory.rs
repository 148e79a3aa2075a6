//! In-process implementation of [`GameStore`] backed by concurrent maps.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dao::{
    game_store::GameStore,
    models::{
        GameHistoryEntity, PlayerProfileEntity, QuestionEntity, QuestionFilter, SessionEntity,
    },
    storage::{StorageError, StorageResult},
};

/// [`GameStore`] living in process memory. Clones share the same maps.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    codes: DashMap<String, Uuid>,
    // Catalog order matters for `next_question`, so keep it in a Vec.
    questions: RwLock<Vec<QuestionEntity>>,
    players: DashMap<String, PlayerProfileEntity>,
    history: RwLock<Vec<GameHistoryEntity>>,
    unavailable: AtomicBool,
}

impl MemoryInner {
    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store switched off".into(),
                io::Error::new(io::ErrorKind::NotConnected, "store offline"),
            ));
        }
        Ok(())
    }
}

impl MemoryGameStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the question catalog, keeping insertion order.
    pub async fn with_questions(self, questions: Vec<QuestionEntity>) -> Self {
        self.inner.questions.write().await.extend(questions);
        self
    }

    /// Register a player profile in the directory.
    pub fn insert_player(&self, profile: PlayerProfileEntity) {
        self.inner.players.insert(profile.id.clone(), profile);
    }

    /// Simulate an outage: every subsequent call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of the appended history records.
    pub async fn history(&self) -> Vec<GameHistoryEntity> {
        self.inner.history.read().await.clone()
    }

    /// Direct read of a stored session, bypassing the availability switch.
    pub fn stored_session(&self, id: Uuid) -> Option<SessionEntity> {
        self.inner.sessions.get(&id).map(|entry| entry.clone())
    }
}

impl GameStore for MemoryGameStore {
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            Ok(inner.sessions.get(&id).map(|entry| entry.clone()))
        })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            let Some(id) = inner.codes.get(&code).map(|entry| *entry) else {
                return Ok(None);
            };
            Ok(inner.sessions.get(&id).map(|entry| entry.clone()))
        })
    }

    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            if inner.sessions.contains_key(&session.id) {
                return Err(StorageError::Duplicate(format!("session id {}", session.id)));
            }
            match inner.codes.entry(session.code.clone()) {
                Entry::Occupied(_) => {
                    Err(StorageError::Duplicate(format!("join code {}", session.code)))
                }
                Entry::Vacant(slot) => {
                    slot.insert(session.id);
                    inner.sessions.insert(session.id, session);
                    Ok(())
                }
            }
        })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            inner.codes.insert(session.code.clone(), session.id);
            inner.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            match inner.sessions.remove(&id) {
                Some((_, session)) => {
                    inner.codes.remove(&session.code);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn find_question(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            let questions = inner.questions.read().await;
            Ok(questions.iter().find(|question| question.id == id).cloned())
        })
    }

    fn next_question(
        &self,
        filter: QuestionFilter,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            let questions = inner.questions.read().await;
            Ok(questions
                .iter()
                .find(|question| matches_filter(question, &filter))
                .cloned())
        })
    }

    fn find_player(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerProfileEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            Ok(inner.players.get(&id).map(|entry| entry.clone()))
        })
    }

    fn append_history(&self, record: GameHistoryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check_available()?;
            inner.history.write().await.push(record);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.check_available() })
    }
}

fn matches_filter(question: &QuestionEntity, filter: &QuestionFilter) -> bool {
    if filter.exclude.contains(&question.id) {
        return false;
    }
    if let Some(category) = filter.category.as_deref() {
        if !question.category.eq_ignore_ascii_case(category) {
            return false;
        }
    }
    if let Some(difficulty) = filter.difficulty.as_deref() {
        if !question.difficulty.eq_ignore_ascii_case(difficulty) {
            return false;
        }
    }
    match filter.round_type {
        Some(round_type) if !question.round_types.is_empty() => {
            question.round_types.contains(&round_type)
        }
        _ => true,
    }
}
