use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Trivia Live Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::metrics::metrics,
        crate::routes::sessions::create_session,
        crate::routes::sessions::get_session,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::metrics::MetricsSnapshot,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SessionCreated,
            crate::dto::events::GameStateSnapshot,
            crate::dto::ws::InboundEnvelope,
            crate::dto::ws::IdentifyPayload,
            crate::dto::ws::JoinPayload,
            crate::dto::ws::StartRoundPayload,
            crate::dto::ws::EndRoundPayload,
            crate::dto::ws::NextQuestionPayload,
            crate::dto::ws::RevealPayload,
            crate::dto::ws::GradePayload,
            crate::dto::ws::ReasonPayload,
            crate::dto::ws::SubmitAnswerPayload,
            crate::dto::ws::BuzzPayload,
            crate::dto::events::PlayerJoinedEvent,
            crate::dto::events::PlayerLeftEvent,
            crate::dto::events::PlayerDisconnectedEvent,
            crate::dto::events::PlayerReconnectedEvent,
            crate::dto::events::GameStartedEvent,
            crate::dto::events::GamePausedEvent,
            crate::dto::events::GameResumedEvent,
            crate::dto::events::GameEndedEvent,
            crate::dto::events::RoundStartedEvent,
            crate::dto::events::RoundEndedEvent,
            crate::dto::events::QuestionPayload,
            crate::dto::events::QuestionTimeUpEvent,
            crate::dto::events::QuestionRevealEvent,
            crate::dto::events::AnswerConfirmedEvent,
            crate::dto::events::AnswerReceivedEvent,
            crate::dto::events::PlayerBuzzedEvent,
            crate::dto::events::BuzzerFirstEvent,
            crate::dto::events::ErrorEvent,
        )
    ),
    tags(
        (name = "monitoring", description = "Health and metrics endpoints"),
        (name = "sessions", description = "Session bootstrap and inspection"),
        (name = "realtime", description = "WebSocket protocol for hosts and players"),
    )
)]
/// OpenAPI document of the REST surface.
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        for expected in ["/healthcheck", "/metrics", "/sessions", "/sessions/{code}", "/ws"] {
            assert!(paths.iter().any(|path| path == expected), "missing {expected}");
        }
    }
}
