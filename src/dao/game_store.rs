use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{
        GameHistoryEntity, PlayerProfileEntity, QuestionEntity, QuestionFilter, SessionEntity,
    },
    storage::StorageResult,
};

/// Abstraction over the durable store holding sessions, the question catalog,
/// player profiles and completed-game history.
pub trait GameStore: Send + Sync {
    /// Load a session by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Load a session by join code.
    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Insert a new session; fails with [`StorageError::Duplicate`] when the id or code exists.
    ///
    /// [`StorageError::Duplicate`]: crate::dao::storage::StorageError::Duplicate
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Atomically replace the stored session.
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a session. Returns whether it existed.
    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    /// Load a catalog question by id.
    fn find_question(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;
    /// Next catalog question matching `filter` that is not in `filter.exclude`.
    fn next_question(
        &self,
        filter: QuestionFilter,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;
    /// Profile of a known player, if one was registered.
    fn find_player(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerProfileEntity>>>;
    /// Append the summary of a completed game.
    fn append_history(&self, record: GameHistoryEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Cheap round trip used by the storage supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
