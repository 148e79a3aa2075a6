/// Persistence contract consumed by the orchestrator.
pub mod game_store;
/// In-process store used by the binary and the test-suite.
pub mod memory;
/// Entities exchanged with the store.
pub mod models;
/// Backend-agnostic storage errors.
pub mod storage;
