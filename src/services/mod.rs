use crate::state::connections::ConnectionId;

/// Answer submission, host grading and buzz-ins.
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Outbound event encoding and room delivery.
pub mod events;
/// Health check service.
pub mod health_service;
/// Question flow: next question, expiry and reveal.
pub mod question_service;
/// Grace windows, resynchronisation and host-drop handling.
pub mod reconnection_service;
/// Round start/end and round timers.
pub mod round_service;
/// Session bootstrap, membership and lifecycle transitions.
pub mod session_service;
/// Background storage health polling.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;

/// Identified connection on whose behalf an event is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Socket the event arrived on.
    pub connection_id: ConnectionId,
    /// Identity bound by `identify`.
    pub identity: String,
}

impl Caller {
    /// Caller for `identity` on `connection_id`.
    pub fn new(connection_id: ConnectionId, identity: impl Into<String>) -> Self {
        Self {
            connection_id,
            identity: identity.into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::extract::ws::Message;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{Caller, round_service, session_service};
    use crate::{
        config::AppConfig,
        dao::{
            game_store::GameStore,
            memory::MemoryGameStore,
            models::{AnswerKey, QuestionEntity},
        },
        dto::{session::CreateSessionRequest, ws::StartRoundPayload},
        state::{AppState, SharedState, rounds::RoundSettingsInput},
    };

    /// Fake socket: a registered connection whose frames land in a channel.
    pub struct TestClient {
        pub caller: Caller,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl TestClient {
        /// Drain every pending frame as `(event, data)` pairs.
        pub fn events(&mut self) -> Vec<(String, Value)> {
            let mut events = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                if let Message::Text(text) = message {
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                    events.push((
                        frame["event"].as_str().unwrap_or_default().to_string(),
                        frame["data"].clone(),
                    ));
                }
            }
            events
        }

        /// Payload of the last pending `event`, draining the channel.
        pub fn last(&mut self, event: &str) -> Option<Value> {
            self.events()
                .into_iter()
                .filter(|(name, _)| name == event)
                .map(|(_, data)| data)
                .next_back()
        }
    }

    pub async fn app(questions: Vec<QuestionEntity>) -> (SharedState, MemoryGameStore) {
        let memory = MemoryGameStore::new().with_questions(questions).await;
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());
        let state = AppState::with_store(AppConfig::default(), store).await;
        (state, memory)
    }

    pub fn connect(state: &SharedState, identity: &str) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = state.connections().register(tx);
        state.connections().identify(connection_id, identity);
        TestClient {
            caller: Caller::new(connection_id, identity),
            rx,
        }
    }

    pub fn choice_question(category: &str, correct_index: usize) -> QuestionEntity {
        QuestionEntity {
            id: Uuid::new_v4(),
            text: format!("{category} question"),
            category: category.to_string(),
            difficulty: "easy".into(),
            round_types: Vec::new(),
            answer: AnswerKey::MultipleChoice {
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_index,
            },
        }
    }

    /// Active game with round 1 started and every inbox drained.
    pub async fn running_game(
        questions: Vec<QuestionEntity>,
        players: &[&str],
        round_type: &str,
        settings: RoundSettingsInput,
    ) -> (SharedState, String, TestClient, Vec<TestClient>) {
        running_game_limited(questions, players, round_type, settings, None).await
    }

    pub async fn running_game_limited(
        questions: Vec<QuestionEntity>,
        players: &[&str],
        round_type: &str,
        settings: RoundSettingsInput,
        round_count: Option<u32>,
    ) -> (SharedState, String, TestClient, Vec<TestClient>) {
        let (state, _) = app(questions).await;
        let (code, host, clients) =
            start_first_round(&state, players, round_type, settings, round_count).await;
        (state, code, host, clients)
    }

    /// Open a session on `state`, seat `players`, start the game and round 1.
    pub async fn start_first_round(
        state: &SharedState,
        players: &[&str],
        round_type: &str,
        settings: RoundSettingsInput,
        round_count: Option<u32>,
    ) -> (String, TestClient, Vec<TestClient>) {
        let created = session_service::create_session(
            state,
            CreateSessionRequest {
                host_id: "host".into(),
                settings: None,
                round_count,
            },
        )
        .await
        .unwrap();
        let code = created.code;

        let mut host = connect(state, "host");
        session_service::join(state, &host.caller, &code).await.unwrap();
        let mut clients = Vec::new();
        for player in players {
            let client = connect(state, player);
            session_service::join(state, &client.caller, &code).await.unwrap();
            clients.push(client);
        }
        session_service::start_game(state, &host.caller).await.unwrap();
        round_service::start_round(
            state,
            &host.caller,
            StartRoundPayload {
                round_number: 1,
                round_type: round_type.into(),
                settings,
                title: None,
            },
        )
        .await
        .unwrap();

        host.events();
        for client in &mut clients {
            client.events();
        }
        (code, host, clients)
    }
}
