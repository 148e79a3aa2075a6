//! Application-level configuration loading: timings, rate limits and the
//! optional question catalog seed.

use std::{
    collections::HashMap,
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{dao::models::QuestionEntity, state::rate_limit::RateLimit};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_LIVE_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long a dropped identity keeps its seat before being removed.
    pub reconnect_grace: Duration,
    /// Per-question time limit used when a round does not set one.
    pub default_question_time_secs: u32,
    /// Time a fresh socket has to send `identify` before it is closed.
    pub identify_timeout: Duration,
    /// Attach debug details to outbound `error` events. Off in production.
    pub expose_error_details: bool,
    /// Optional JSON question catalog seeded into the in-memory store.
    pub question_catalog_path: Option<PathBuf>,
    /// Limit applied to inbound events without an override.
    pub default_rate_limit: RateLimit,
    /// Per-event overrides keyed by inbound event name.
    pub event_rate_limits: HashMap<String, RateLimit>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        grace_secs = app_config.reconnect_grace.as_secs(),
                        rate_limited_events = app_config.event_rate_limits.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Read the question catalog seed, if one is configured.
    pub fn load_question_catalog(&self) -> Vec<QuestionEntity> {
        let Some(path) = self.question_catalog_path.as_deref() else {
            info!("no question catalog configured; starting with an empty catalog");
            return Vec::new();
        };
        read_catalog(path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

fn read_catalog(path: &Path) -> Vec<QuestionEntity> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read question catalog");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<QuestionEntity>>(&contents) {
        Ok(questions) => {
            info!(path = %path.display(), count = questions.len(), "loaded question catalog");
            questions
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to parse question catalog");
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    reconnect_grace_secs: u64,
    default_question_time_secs: u32,
    identify_timeout_secs: u64,
    expose_error_details: bool,
    question_catalog_path: Option<PathBuf>,
    rate_limits: RawRateLimits,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_secs: 30,
            default_question_time_secs: 30,
            identify_timeout_secs: 10,
            expose_error_details: false,
            question_catalog_path: None,
            rate_limits: RawRateLimits::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRateLimits {
    default: RateLimit,
    events: HashMap<String, RateLimit>,
}

impl Default for RawRateLimits {
    fn default() -> Self {
        Self {
            default: RateLimit::new(30, 10),
            events: HashMap::from([
                ("answer:submit".to_string(), RateLimit::new(5, 10)),
                ("player:buzzer".to_string(), RateLimit::new(5, 10)),
                ("game:join".to_string(), RateLimit::new(10, 10)),
            ]),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        // Per-event entries from the file extend the built-in ones.
        let mut event_rate_limits = RawRateLimits::default().events;
        event_rate_limits.extend(value.rate_limits.events);

        Self {
            reconnect_grace: Duration::from_secs(value.reconnect_grace_secs),
            default_question_time_secs: value.default_question_time_secs.max(1),
            identify_timeout: Duration::from_secs(value.identify_timeout_secs.max(1)),
            expose_error_details: value.expose_error_details,
            question_catalog_path: value.question_catalog_path,
            default_rate_limit: value.rate_limits.default,
            event_rate_limits,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
