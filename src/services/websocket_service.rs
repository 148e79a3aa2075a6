use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{ClientEvent, InboundEnvelope, client_events},
    error::ServiceError,
    services::{
        Caller, answer_service, events, question_service, reconnection_service, round_service,
        session_service,
    },
    state::{SharedState, connections::ConnectionId},
};

/// Handle the full lifecycle of one client WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = state.connections().register(outbound_tx.clone());
    state.metrics().connection_opened();
    debug!(%connection_id, "connection opened");

    let Some(identity) = identify(&state, connection_id, &mut receiver).await else {
        let _ = outbound_tx.send(Message::Close(None));
        disconnect(&state, connection_id).await;
        finalize(writer_task, outbound_tx).await;
        return;
    };
    info!(%connection_id, identity = %identity, "connection identified");
    let caller = Caller::new(connection_id, identity);

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => process_frame(&state, &caller, text.as_str()).await,
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                debug!(%connection_id, "client closed the connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                let err = ServiceError::InvalidInput("binary frames are not supported".into());
                events::report_error(&state, connection_id, &err, None);
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    disconnect(&state, connection_id).await;
    finalize(writer_task, outbound_tx).await;
}

/// Wait for the mandatory `identify` frame and bind the identity to the connection.
async fn identify<S>(state: &SharedState, connection_id: ConnectionId, receiver: &mut S) -> Option<String>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let timeout = state.config().identify_timeout;
    let text = match tokio::time::timeout(timeout, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
        Ok(Some(Ok(_))) => {
            let err = ServiceError::InvalidInput("expected an `identify` text frame".into());
            events::report_error(state, connection_id, &err, None);
            return None;
        }
        Ok(Some(Err(err))) => {
            warn!(%connection_id, error = %err, "websocket receive error");
            return None;
        }
        Err(_) => {
            warn!(%connection_id, "websocket identification timed out");
            let err = ServiceError::InvalidState("identification timed out".into());
            events::report_error(state, connection_id, &err, None);
            return None;
        }
    };

    state.metrics().message_received(None);
    match parse_identify(text.as_str()) {
        Ok(identity) => {
            state.connections().identify(connection_id, &identity);
            Some(identity)
        }
        Err(err) => {
            events::report_error(state, connection_id, &err, None);
            None
        }
    }
}

/// Extract the identity from the first frame of a socket.
pub fn parse_identify(text: &str) -> Result<String, ServiceError> {
    match ClientEvent::parse(InboundEnvelope::from_json_str(text)?)? {
        ClientEvent::Identify(payload) => Ok(payload.player_id),
        _ => Err(ServiceError::InvalidState(
            "the first event on a connection must be `identify`".into(),
        )),
    }
}

/// Handle one inbound text frame of an identified connection. Failures are
/// reported back to the connection as an `error` event.
pub async fn process_frame(state: &SharedState, caller: &Caller, text: &str) {
    let session_id = state
        .connections()
        .session_of(caller.connection_id)
        .and_then(|code| state.sessions().get(&code))
        .map(|handle| handle.id);
    state.metrics().message_received(session_id);

    if let Err(err) = handle_frame(state, caller, text).await {
        events::report_error(state, caller.connection_id, &err, session_id);
    }
}

async fn handle_frame(state: &SharedState, caller: &Caller, text: &str) -> Result<(), ServiceError> {
    let envelope = InboundEnvelope::from_json_str(text)?;
    state
        .rate_limiter()
        .check(caller.connection_id, client_events::rate_bucket(&envelope.event))?;
    debug!(
        connection_id = %caller.connection_id,
        identity = %caller.identity,
        event = %envelope.event,
        "inbound event"
    );
    dispatch(state, caller, ClientEvent::parse(envelope)?).await
}

async fn dispatch(state: &SharedState, caller: &Caller, event: ClientEvent) -> Result<(), ServiceError> {
    match event {
        ClientEvent::Identify(payload) if payload.player_id == caller.identity => Ok(()),
        ClientEvent::Identify(_) => Err(ServiceError::InvalidState(format!(
            "connection is already identified as `{}`",
            caller.identity
        ))),
        ClientEvent::GameJoin(payload) => session_service::join(state, caller, &payload.code).await,
        ClientEvent::GameLeave => session_service::leave(state, caller).await,
        ClientEvent::PlayerReady => session_service::toggle_ready(state, caller).await,
        ClientEvent::GameStart(_) => session_service::start_game(state, caller).await,
        ClientEvent::GamePause(payload) => {
            session_service::pause_game(state, caller, payload.reason).await
        }
        ClientEvent::GameResume(_) => session_service::resume_game(state, caller).await,
        ClientEvent::GameEnd(payload) => session_service::end_game(state, caller, payload.reason).await,
        ClientEvent::RoundStart(payload) => round_service::start_round(state, caller, payload).await,
        ClientEvent::RoundEnd(payload) => round_service::end_round(state, caller, payload).await,
        ClientEvent::QuestionNext(payload) => {
            question_service::next_question(state, caller, payload).await
        }
        ClientEvent::QuestionReveal(payload) => {
            question_service::reveal(state, caller, payload.question_id).await
        }
        ClientEvent::AnswerSubmit(payload) => {
            answer_service::submit_answer(state, caller, payload).await
        }
        ClientEvent::AnswerCorrect(payload) => answer_service::grade(state, caller, payload, true).await,
        ClientEvent::AnswerIncorrect(payload) => {
            answer_service::grade(state, caller, payload, false).await
        }
        ClientEvent::PlayerBuzzer(payload) => answer_service::buzz(state, caller, payload).await,
    }
}

/// Release everything the connection held and start disconnect handling.
async fn disconnect(state: &SharedState, connection_id: ConnectionId) {
    state.rate_limiter().forget(connection_id);
    let Some(departure) = state.connections().unregister(connection_id) else {
        return;
    };
    info!(
        %connection_id,
        identity = ?departure.identity,
        session = ?departure.session_code,
        "connection closed"
    );
    reconnection_service::on_disconnect(state, departure).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::{
        dto::{session::CreateSessionRequest, ws::server_events},
        error::codes,
        services::test_support::{app, connect},
    };

    fn frame(event: &str, data: serde_json::Value) -> String {
        json!({ "event": event, "data": data }).to_string()
    }

    #[test]
    fn first_frame_must_identify() {
        assert_eq!(
            parse_identify(&frame("identify", json!({ "playerId": "alice" }))).unwrap(),
            "alice"
        );
        let err = parse_identify(&frame("player:ready", json!({}))).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_STATE);
        let err = parse_identify(&frame("identify", json!({ "playerId": "" }))).unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn frames_drive_the_session() {
        let (state, _) = app(Vec::new()).await;
        let created = session_service::create_session(
            &state,
            CreateSessionRequest {
                host_id: "host".into(),
                settings: None,
                round_count: None,
            },
        )
        .await
        .unwrap();
        let mut host = connect(&state, "host");
        let mut alice = connect(&state, "alice");

        let join = frame("game:join", json!({ "code": created.code }));
        process_frame(&state, &host.caller, &join).await;
        process_frame(&state, &alice.caller, &join).await;
        process_frame(&state, &alice.caller, &frame("player:ready", json!(null))).await;
        process_frame(&state, &host.caller, &frame("game:start", json!({}))).await;

        let started = alice.last(server_events::GAME_STARTED).unwrap();
        assert_eq!(started["playerCount"], 1);
        assert!(host.events().iter().all(|(name, _)| name != server_events::ERROR));

        process_frame(&state, &alice.caller, &frame("game:end", json!({}))).await;
        let error = alice.last(server_events::ERROR).unwrap();
        assert_eq!(error["code"], codes::PERMISSION_DENIED);
        assert!(error.get("details").is_none());

        let snapshot = state.metrics().snapshot(state.connections().active_connections());
        assert_eq!(snapshot.global.messages_received, 5);
        assert_eq!(snapshot.sessions[0].errors, 1);
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_reported() {
        let (state, _) = app(Vec::new()).await;
        let mut client = connect(&state, "alice");

        process_frame(&state, &client.caller, "{ nope").await;
        let error = client.last(server_events::ERROR).unwrap();
        assert_eq!(error["code"], codes::VALIDATION_ERROR);

        process_frame(&state, &client.caller, &frame("dance", json!({}))).await;
        let error = client.last(server_events::ERROR).unwrap();
        assert_eq!(error["code"], codes::VALIDATION_ERROR);
        assert!(error["message"].as_str().unwrap().contains("dance"));

        process_frame(&state, &client.caller, &frame("identify", json!({ "playerId": "bob" })))
            .await;
        let error = client.last(server_events::ERROR).unwrap();
        assert_eq!(error["code"], codes::INVALID_STATE);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_event_names_share_one_rate_window() {
        let (state, _) = app(Vec::new()).await;
        let mut client = connect(&state, "alice");

        for i in 0..100 {
            process_frame(&state, &client.caller, &frame(&format!("junk:{i}"), json!({}))).await;
        }
        assert_eq!(state.rate_limiter().tracked_windows(), 1);

        let codes_seen: Vec<_> = client
            .events()
            .into_iter()
            .map(|(_, data)| data["code"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(codes_seen.len(), 100);
        assert!(codes_seen[..30].iter().all(|code| code == codes::VALIDATION_ERROR));
        assert!(codes_seen[30..].iter().all(|code| code == codes::RATE_LIMIT_EXCEEDED));

        // Known events keep their own windows.
        process_frame(&state, &client.caller, &frame("player:ready", json!({}))).await;
        assert_eq!(state.rate_limiter().tracked_windows(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flooding_one_event_type_is_rate_limited() {
        let (state, _) = app(Vec::new()).await;
        let mut client = connect(&state, "alice");
        let submit = frame(
            "answer:submit",
            json!({ "questionId": Uuid::new_v4(), "answer": 0 }),
        );

        for _ in 0..5 {
            process_frame(&state, &client.caller, &submit).await;
        }
        let codes_seen: Vec<_> = client
            .events()
            .into_iter()
            .map(|(_, data)| data["code"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(codes_seen.len(), 5);
        assert!(codes_seen.iter().all(|code| code != codes::RATE_LIMIT_EXCEEDED));

        process_frame(&state, &client.caller, &submit).await;
        let error = client.last(server_events::ERROR).unwrap();
        assert_eq!(error["code"], codes::RATE_LIMIT_EXCEEDED);
        assert_eq!(error["retryAfter"], 10);

        // Other event types keep their own window.
        process_frame(&state, &client.caller, &frame("player:ready", json!({}))).await;
        let error = client.last(server_events::ERROR).unwrap();
        assert_ne!(error["code"], codes::RATE_LIMIT_EXCEEDED);

        tokio::time::advance(std::time::Duration::from_secs(10)).await;
        process_frame(&state, &client.caller, &submit).await;
        let error = client.last(server_events::ERROR).unwrap();
        assert_ne!(error["code"], codes::RATE_LIMIT_EXCEEDED);
    }
}
