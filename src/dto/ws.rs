use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::{validate_identity, validate_join_code},
    error::ServiceError,
    state::{ledger::SubmittedAnswer, rounds::RoundSettingsInput},
};

/// Names of the events accepted from clients.
pub mod client_events {
    /// Bind the socket to a player identity.
    pub const IDENTIFY: &str = "identify";
    /// Host starts a round.
    pub const ROUND_START: &str = "round:start";
    /// Host ends a round.
    pub const ROUND_END: &str = "round:end";
    /// Host opens the next question.
    pub const QUESTION_NEXT: &str = "question:next";
    /// Host reveals the answer.
    pub const QUESTION_REVEAL: &str = "question:reveal";
    /// Host marks an answer correct.
    pub const ANSWER_CORRECT: &str = "answer:correct";
    /// Host marks an answer incorrect.
    pub const ANSWER_INCORRECT: &str = "answer:incorrect";
    /// Host starts the game.
    pub const GAME_START: &str = "game:start";
    /// Host pauses the game.
    pub const GAME_PAUSE: &str = "game:pause";
    /// Host resumes the game.
    pub const GAME_RESUME: &str = "game:resume";
    /// Host ends the game.
    pub const GAME_END: &str = "game:end";
    /// Player answers the live question.
    pub const ANSWER_SUBMIT: &str = "answer:submit";
    /// Player buzzes in.
    pub const PLAYER_BUZZER: &str = "player:buzzer";
    /// Player toggles the lobby ready flag.
    pub const PLAYER_READY: &str = "player:ready";
    /// Join a session by code.
    pub const GAME_JOIN: &str = "game:join";
    /// Leave the joined session.
    pub const GAME_LEAVE: &str = "game:leave";

    /// Every name the server understands.
    pub const ALL: [&str; 16] = [
        IDENTIFY,
        ROUND_START,
        ROUND_END,
        QUESTION_NEXT,
        QUESTION_REVEAL,
        ANSWER_CORRECT,
        ANSWER_INCORRECT,
        GAME_START,
        GAME_PAUSE,
        GAME_RESUME,
        GAME_END,
        ANSWER_SUBMIT,
        PLAYER_BUZZER,
        PLAYER_READY,
        GAME_JOIN,
        GAME_LEAVE,
    ];

    /// Shared rate-limit bucket for names outside [`ALL`].
    pub const UNKNOWN: &str = "unknown";

    /// Rate-limit bucket of an inbound event name. Unknown names share one
    /// bucket so clients cannot grow the limiter's state.
    pub fn rate_bucket(event: &str) -> &str {
        if ALL.contains(&event) { event } else { UNKNOWN }
    }
}

/// Names of the events sent to clients.
pub mod server_events {
    /// Full session snapshot.
    pub const GAME_STATE: &str = "game:state";
    /// Game moved to `active`.
    pub const GAME_STARTED: &str = "game:started";
    /// Game paused.
    pub const GAME_PAUSED: &str = "game:paused";
    /// Game resumed.
    pub const GAME_RESUMED: &str = "game:resumed";
    /// Game over, with final standings.
    pub const GAME_ENDED: &str = "game:ended";
    /// Round started.
    pub const ROUND_STARTED: &str = "round:started";
    /// Round ended, with standings.
    pub const ROUND_ENDED: &str = "round:ended";
    /// Question opened.
    pub const QUESTION_NEW: &str = "question:new";
    /// Answer window closed.
    pub const QUESTION_TIME_UP: &str = "question:timeUp";
    /// Answer and results revealed.
    pub const QUESTION_REVEAL: &str = "question:reveal";
    /// Sent to the answering player.
    pub const ANSWER_CONFIRMED: &str = "answer:confirmed";
    /// Sent to the host per submission.
    pub const ANSWER_RECEIVED: &str = "answer:received";
    /// Player joined or came back.
    pub const PLAYER_JOINED: &str = "player:joined";
    /// Player left or was dropped.
    pub const PLAYER_LEFT: &str = "player:left";
    /// Player lost their last connection.
    pub const PLAYER_DISCONNECTED: &str = "player:disconnected";
    /// Player resumed within the grace window.
    pub const PLAYER_RECONNECTED: &str = "player:reconnected";
    /// Buzz-in position.
    pub const PLAYER_BUZZED: &str = "player:buzzed";
    /// First buzz of a question, host only.
    pub const BUZZER_FIRST: &str = "buzzer:first";
    /// Failure report.
    pub const ERROR: &str = "error";
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Frame exchanged over the socket in both directions.
pub struct InboundEnvelope {
    /// Event name.
    pub event: String,
    /// Event payload, `null` when omitted.
    #[serde(default)]
    pub data: Value,
}

impl InboundEnvelope {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(text)
            .map_err(|err| ServiceError::InvalidInput(format!("malformed frame: {err}")))
    }
}

#[derive(Debug, Serialize)]
/// Outbound frame wrapping a typed payload.
pub struct OutboundEnvelope<'a, T: Serialize> {
    /// Event name.
    pub event: &'a str,
    /// Payload.
    pub data: &'a T,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// First frame of every socket.
pub struct IdentifyPayload {
    /// Identity the socket acts as.
    pub player_id: String,
}

impl Validate for IdentifyPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(err) = validate_identity(&self.player_id) {
            errors.add("playerId", err);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Payload of `game:join`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinPayload {
    /// Six-character join code.
    pub code: String,
}

impl Validate for JoinPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(err) = validate_join_code(&self.code) {
            errors.add("code", err);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Payload of `round:start`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartRoundPayload {
    /// 1-based round number.
    #[validate(range(min = 1, max = 100))]
    pub round_number: u32,
    /// One of `point-builder`, `fastest-finger`, `graduated-points`, `specialist`.
    pub round_type: String,
    /// Overrides of the round type defaults.
    #[serde(default)]
    #[validate(nested)]
    pub settings: RoundSettingsInput,
    /// Display title. Defaults to `Round N`.
    #[validate(length(max = 120))]
    pub title: Option<String>,
}

/// Payload of `round:end`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EndRoundPayload {
    /// Round to end.
    #[validate(range(min = 1, max = 100))]
    pub round_number: u32,
}

/// Payload of `question:next`. Every field is optional.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestionPayload {
    /// Ask this catalog question instead of picking one.
    pub question_id: Option<Uuid>,
    /// Restrict the pick to a category.
    #[validate(length(min = 1, max = 80))]
    pub category: Option<String>,
    /// Restrict the pick to a difficulty.
    #[validate(length(min = 1, max = 40))]
    pub difficulty: Option<String>,
    /// Answer window in seconds.
    #[validate(range(min = 1, max = 3_600))]
    pub time_limit: Option<u32>,
}

/// Payload of `question:reveal`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RevealPayload {
    /// Question to reveal.
    pub question_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
/// Host grading of one player's answer.
pub struct GradePayload {
    /// Player being graded.
    #[validate(length(min = 1, max = 64))]
    pub target_player_id: String,
    /// Question being graded.
    pub question_id: Uuid,
    /// Explicit points. The round policy decides when absent.
    #[validate(range(min = -10_000, max = 10_000))]
    pub points: Option<i32>,
}

/// Payload of the host lifecycle events.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct ReasonPayload {
    /// Free-form reason echoed to players.
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

/// Payload of `answer:submit`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
    /// Question being answered.
    pub question_id: Uuid,
    /// Raw answer. May be absent on timeout.
    pub answer: Option<SubmittedAnswer>,
    /// Set by the client when its countdown ran out.
    #[serde(default)]
    pub timed_out: bool,
}

/// Payload of `player:buzzer`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BuzzPayload {
    /// Question buzzed for.
    pub question_id: Uuid,
}

/// Typed inbound event, parsed from an [`InboundEnvelope`].
#[derive(Debug)]
pub enum ClientEvent {
    /// `identify`
    Identify(IdentifyPayload),
    /// `round:start`
    RoundStart(StartRoundPayload),
    /// `round:end`
    RoundEnd(EndRoundPayload),
    /// `question:next`
    QuestionNext(NextQuestionPayload),
    /// `question:reveal`
    QuestionReveal(RevealPayload),
    /// `answer:correct`
    AnswerCorrect(GradePayload),
    /// `answer:incorrect`
    AnswerIncorrect(GradePayload),
    /// `game:start`
    GameStart(ReasonPayload),
    /// `game:pause`
    GamePause(ReasonPayload),
    /// `game:resume`
    GameResume(ReasonPayload),
    /// `game:end`
    GameEnd(ReasonPayload),
    /// `answer:submit`
    AnswerSubmit(SubmitAnswerPayload),
    /// `player:buzzer`
    PlayerBuzzer(BuzzPayload),
    /// `player:ready`
    PlayerReady,
    /// `game:join`
    GameJoin(JoinPayload),
    /// `game:leave`
    GameLeave,
}

impl ClientEvent {
    /// Decode and validate the payload for the envelope's event name.
    pub fn parse(envelope: InboundEnvelope) -> Result<Self, ServiceError> {
        let InboundEnvelope { event, data } = envelope;
        let parsed = match event.as_str() {
            client_events::IDENTIFY => ClientEvent::Identify(payload(data)?),
            client_events::ROUND_START => ClientEvent::RoundStart(payload(data)?),
            client_events::ROUND_END => ClientEvent::RoundEnd(payload(data)?),
            client_events::QUESTION_NEXT => ClientEvent::QuestionNext(payload(data)?),
            client_events::QUESTION_REVEAL => ClientEvent::QuestionReveal(payload(data)?),
            client_events::ANSWER_CORRECT => ClientEvent::AnswerCorrect(payload(data)?),
            client_events::ANSWER_INCORRECT => ClientEvent::AnswerIncorrect(payload(data)?),
            client_events::GAME_START => ClientEvent::GameStart(payload(data)?),
            client_events::GAME_PAUSE => ClientEvent::GamePause(payload(data)?),
            client_events::GAME_RESUME => ClientEvent::GameResume(payload(data)?),
            client_events::GAME_END => ClientEvent::GameEnd(payload(data)?),
            client_events::ANSWER_SUBMIT => ClientEvent::AnswerSubmit(payload(data)?),
            client_events::PLAYER_BUZZER => ClientEvent::PlayerBuzzer(payload(data)?),
            client_events::PLAYER_READY => ClientEvent::PlayerReady,
            client_events::GAME_JOIN => ClientEvent::GameJoin(payload(data)?),
            client_events::GAME_LEAVE => ClientEvent::GameLeave,
            other => {
                return Err(ServiceError::InvalidInput(format!("unknown event `{other}`")));
            }
        };
        Ok(parsed)
    }
}

fn payload<T>(data: Value) -> Result<T, ServiceError>
where
    T: DeserializeOwned + Validate,
{
    // Events without fields may omit `data` entirely.
    let data = match data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let parsed: T = serde_json::from_value(data)
        .map_err(|err| ServiceError::InvalidInput(format!("invalid payload: {err}")))?;
    parsed.validate()?;
    Ok(parsed)
}
