/// Buzz-in order for fastest-finger questions.
pub mod buzzer;
pub mod connections;
pub mod ledger;
/// Process and per-session counters.
pub mod metrics;
/// Per-connection sliding-window rate limits.
pub mod rate_limit;
/// Grace windows for dropped identities.
pub mod reconnection;
pub mod registry;
pub mod rounds;
/// Session entity and its players.
pub mod session;
/// Two-phase session lifecycle.
pub mod state_machine;
pub mod timers;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::RwLock;

use crate::{config::AppConfig, dao::game_store::GameStore, error::ServiceError};

use self::{
    connections::ConnectionRegistry, metrics::Monitoring, rate_limit::RateLimiter,
    reconnection::ReconnectionManager, registry::SessionRegistry, timers::TimerService,
};

/// Application state shared by every handler.
pub type SharedState = Arc<AppState>;

/// Central application state: live sessions, connections, timers and the store handle.
pub struct AppState {
    config: Arc<AppConfig>,
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    degraded: AtomicBool,
    connections: ConnectionRegistry,
    rate_limiter: RateLimiter,
    sessions: SessionRegistry,
    timers: TimerService,
    reconnections: ReconnectionManager,
    metrics: Monitoring,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let rate_limiter =
            RateLimiter::new(config.default_rate_limit, config.event_rate_limits.clone());
        let reconnections = ReconnectionManager::new(config.reconnect_grace);
        Arc::new(Self {
            config: Arc::new(config),
            game_store: RwLock::new(None),
            degraded: AtomicBool::new(true),
            connections: ConnectionRegistry::new(),
            rate_limiter,
            sessions: SessionRegistry::new(),
            timers: TimerService::new(),
            reconnections,
            metrics: Monitoring::new(),
        })
    }

    /// Build a state with a store already installed.
    pub async fn with_store(config: AppConfig, store: Arc<dyn GameStore>) -> SharedState {
        let state = Self::new(config);
        state.set_game_store(store).await;
        state
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is usable.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Whether the store is currently unreachable.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Record the latest storage health check.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.store(value, Ordering::SeqCst);
    }

    /// Live sockets and their rooms.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Inbound event rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Live sessions by join code.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Keyed timer tasks.
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Pending reconnection windows.
    pub fn reconnections(&self) -> &ReconnectionManager {
        &self.reconnections
    }

    /// Counters behind `GET /metrics`.
    pub fn metrics(&self) -> &Monitoring {
        &self.metrics
    }
}
