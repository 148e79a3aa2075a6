use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Install the store produced by `connect`, then keep polling its health and
/// toggle degraded mode as it comes and goes.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    let store = loop {
        match connect().await {
            Ok(store) => break store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    };
    state.set_game_store(store.clone()).await;
    info!("storage connection established; leaving degraded mode");

    delay = INITIAL_DELAY;
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                delay = INITIAL_DELAY;
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                if !state.is_degraded() {
                    warn!(error = %err, "storage health check failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(error = %err, "storage still unavailable");
                }
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::memory::MemoryGameStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn degraded_mode_follows_store_health() {
        let state = AppState::new(AppConfig::default());
        let memory = MemoryGameStore::new();
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());

        let supervised = state.clone();
        let task = tokio::spawn(run(supervised, move || {
            let store = store.clone();
            async move { Ok(store) }
        }));

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());

        memory.set_unavailable(true);
        sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(10)).await;
        assert!(state.is_degraded());

        memory.set_unavailable(false);
        sleep(MAX_DELAY).await;
        assert!(!state.is_degraded());
        task.abort();
    }
}
