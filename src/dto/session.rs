use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{dto::validation::validate_identity, state::session::SessionSettings};

/// Payload used to open a new live session.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Identity allowed to issue host events.
    pub host_id: String,
    /// Overrides of the default session settings.
    #[serde(default)]
    pub settings: Option<SessionSettingsInput>,
    /// Number of rounds after which the game ends on its own.
    #[serde(default)]
    pub round_count: Option<u32>,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_identity(&self.host_id) {
            errors.add("hostId", e);
        }

        if let Some(ref settings) = self.settings {
            if let Err(settings_errors) = settings.validate() {
                errors.merge_self("settings", Err(settings_errors));
            }
        }

        if let Some(count) = self.round_count {
            if !(1..=50).contains(&count) {
                let mut err = ValidationError::new("round_count_range");
                err.message = Some("roundCount must be between 1 and 50".into());
                errors.add("roundCount", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl CreateSessionRequest {
    /// Settings of the new session, defaults filling any omitted field.
    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = self
            .settings
            .as_ref()
            .map(SessionSettingsInput::to_settings)
            .unwrap_or_default();
        settings.round_count = self.round_count;
        settings
    }
}

/// Host-supplied session settings; omitted fields keep their defaults.
#[derive(Debug, Default, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettingsInput {
    /// Seat limit, host excluded.
    #[validate(range(min = 1, max = 500))]
    pub max_players: Option<u32>,
    /// Whether the session is listed publicly.
    pub public_game: Option<bool>,
    /// Whether players may join once the game has started.
    pub allow_join_after_start: Option<bool>,
    /// Number of questions reserved for the game.
    #[validate(range(min = 1, max = 1_000))]
    pub question_pool_size: Option<u32>,
}

impl SessionSettingsInput {
    /// Merge over [`SessionSettings::default`].
    pub fn to_settings(&self) -> SessionSettings {
        let defaults = SessionSettings::default();
        SessionSettings {
            max_players: self.max_players.unwrap_or(defaults.max_players),
            public_game: self.public_game.unwrap_or(defaults.public_game),
            allow_join_after_start: self
                .allow_join_after_start
                .unwrap_or(defaults.allow_join_after_start),
            question_pool_size: self
                .question_pool_size
                .unwrap_or(defaults.question_pool_size),
            round_count: defaults.round_count,
        }
    }
}

/// Response of `POST /sessions`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    /// Id of the new session.
    pub session_id: Uuid,
    /// Join code players use with `game:join`.
    pub code: String,
    /// Identity allowed to drive the game.
    pub host_id: String,
    /// Effective settings after defaults were applied.
    pub settings: SessionSettings,
}
