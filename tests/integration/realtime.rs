//! Realtime WebSocket integration tests
//!
//! A real gateway listener, a real WebSocket client and a wiremock backend
//! streaming newline-delimited JSON answers.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

use docent::relay::ServerEvent;

use crate::common::{bearer, constants, LiveServer};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_WAIT: Duration = Duration::from_secs(5);

async fn connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.expect("WebSocket connect failed");
    ws
}

async fn connect_with_header(url: &str, authorization: &str) -> Result<WsClient, WsError> {
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", authorization.parse().unwrap());
    connect_async(request).await.map(|(ws, _)| ws)
}

async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("send failed");
}

async fn ask(ws: &mut WsClient, chat_id: &str, question: &str, question_id: &str) {
    send_json(
        ws,
        json!({
            "type": "question",
            "chat_id": chat_id,
            "question": question,
            "question_id": question_id
        }),
    )
    .await;
}

async fn next_event(ws: &mut WsClient) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(EVENT_WAIT, ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("event should be valid JSON");
        }
    }
}

fn is_terminal(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::Complete { .. } | ServerEvent::Error { .. }
    )
}

/// Collect events until `terminals` answers have completed or failed
async fn collect_answers(ws: &mut WsClient, terminals: usize) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    let mut seen = 0;
    while seen < terminals {
        let event = next_event(ws).await;
        if is_terminal(&event) {
            seen += 1;
        }
        events.push(event);
    }
    events
}

fn question_id_of(event: &ServerEvent) -> Option<&str> {
    match event {
        ServerEvent::Partial { question_id, .. }
        | ServerEvent::Complete { question_id, .. }
        | ServerEvent::Error { question_id, .. } => question_id.as_deref(),
    }
}

fn partial(chat_id: &str, question_id: &str, content: &str) -> ServerEvent {
    ServerEvent::Partial {
        chat_id: chat_id.to_string(),
        question_id: Some(question_id.to_string()),
        content: content.to_string(),
    }
}

fn complete(chat_id: &str, question_id: &str, answer: &str) -> ServerEvent {
    ServerEvent::Complete {
        chat_id: chat_id.to_string(),
        question_id: Some(question_id.to_string()),
        answer: answer.to_string(),
    }
}

// =============================================================================
// Answer streaming
// =============================================================================

#[tokio::test]
async fn test_fragments_arrive_in_order_then_complete() {
    let server = LiveServer::start().await;
    server
        .backend
        .mock_ask_stream(&[r#"{"content":"Sun"}"#, r#"{"content":"ny"}"#])
        .await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    ask(&mut ws, constants::TEST_CHAT_ID, "What is the weather?", "q1").await;

    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(
        events,
        vec![
            partial(constants::TEST_CHAT_ID, "q1", "Sun"),
            partial(constants::TEST_CHAT_ID, "q1", "ny"),
            complete(constants::TEST_CHAT_ID, "q1", "Sunny"),
        ]
    );

    let requests = server.backend.requests_to("/ask").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("authorization").unwrap().to_str().unwrap(),
        bearer()
    );
    let body = String::from_utf8_lossy(&requests[0].body).into_owned();
    assert!(body.contains("What is the weather?"));
    assert!(body.contains(constants::TEST_CHAT_ID));
}

#[tokio::test]
async fn test_malformed_unit_is_skipped() {
    let server = LiveServer::start().await;
    server
        .backend
        .mock_ask_stream(&[r#"{"content":"a"}"#, r#"{broken"#, r#"{"content":"b"}"#])
        .await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    ask(&mut ws, constants::TEST_CHAT_ID, "Letters?", "q1").await;

    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(
        events,
        vec![
            partial(constants::TEST_CHAT_ID, "q1", "a"),
            partial(constants::TEST_CHAT_ID, "q1", "b"),
            complete(constants::TEST_CHAT_ID, "q1", "ab"),
        ]
    );
}

#[tokio::test]
async fn test_header_credential_is_used() {
    let server = LiveServer::start().await;
    server.backend.mock_ask_stream(&[r#"{"content":"ok"}"#]).await;

    let mut ws = connect_with_header(&server.ws_url(None), &bearer())
        .await
        .expect("upgrade with a bearer header should succeed");
    ask(&mut ws, constants::TEST_CHAT_ID, "Ping?", "q1").await;

    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(events.last(), Some(&complete(constants::TEST_CHAT_ID, "q1", "ok")));
}

#[tokio::test]
async fn test_message_token_is_used_without_connection_credential() {
    let server = LiveServer::start().await;
    server.backend.mock_ask_stream(&[r#"{"content":"ok"}"#]).await;

    let mut ws = connect(&server.ws_url(None)).await;
    send_json(
        &mut ws,
        json!({
            "type": "question",
            "chat_id": constants::TEST_CHAT_ID,
            "question": "Ping?",
            "token": constants::TEST_TOKEN
        }),
    )
    .await;

    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(
        events.last(),
        Some(&ServerEvent::Complete {
            chat_id: constants::TEST_CHAT_ID.to_string(),
            question_id: None,
            answer: "ok".to_string(),
        })
    );
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_credential_is_unauthorized_without_backend_call() {
    let server = LiveServer::start().await;

    let mut ws = connect(&server.ws_url(None)).await;
    ask(&mut ws, constants::TEST_CHAT_ID, "Anyone?", "q1").await;

    match next_event(&mut ws).await {
        ServerEvent::Error {
            code, question_id, ..
        } => {
            assert_eq!(code, "UNAUTHORIZED");
            assert_eq!(question_id.as_deref(), Some("q1"));
        }
        other => panic!("expected an error event, got {:?}", other),
    }

    assert!(server.backend.requests_to("/ask").await.is_empty());
}

#[tokio::test]
async fn test_malformed_authorization_header_is_refused_before_upgrade() {
    let server = LiveServer::start().await;

    match connect_with_header(&server.ws_url(None), "Token abc").await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        Err(other) => panic!("expected an HTTP rejection, got {:?}", other),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn test_backend_failure_yields_error_and_connection_recovers() {
    let server = LiveServer::start().await;
    server
        .backend
        .mock_ask_failure_for_chat("chat-broken", 500)
        .await;
    server
        .backend
        .mock_ask_stream_for_chat(constants::TEST_CHAT_ID, &[r#"{"content":"fine"}"#])
        .await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    ask(&mut ws, "chat-broken", "Will this work?", "q1").await;

    let failed = collect_answers(&mut ws, 1).await;
    assert_eq!(failed.len(), 1, "no partial or complete after a failure");
    match &failed[0] {
        ServerEvent::Error {
            chat_id,
            code,
            message,
            ..
        } => {
            assert_eq!(chat_id.as_deref(), Some("chat-broken"));
            assert_eq!(code, "UPSTREAM_REJECTED");
            assert_eq!(message, "Retriever offline");
        }
        other => panic!("expected an error event, got {:?}", other),
    }

    ask(&mut ws, constants::TEST_CHAT_ID, "And now?", "q2").await;
    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(
        events,
        vec![
            partial(constants::TEST_CHAT_ID, "q2", "fine"),
            complete(constants::TEST_CHAT_ID, "q2", "fine"),
        ]
    );
}

#[tokio::test]
async fn test_backend_slow_to_answer_times_out() {
    let server = LiveServer::start_with(|config| {
        config.stream_idle_timeout = Duration::from_millis(200);
    })
    .await;
    server
        .backend
        .mock_ask_slow(Duration::from_secs(4), &[r#"{"content":"late"}"#])
        .await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    let started = Instant::now();
    ask(&mut ws, constants::TEST_CHAT_ID, "Anyone home?", "q1").await;

    match next_event(&mut ws).await {
        ServerEvent::Error {
            code, question_id, ..
        } => {
            assert_eq!(code, "UPSTREAM_TIMEOUT");
            assert_eq!(question_id.as_deref(), Some("q1"));
        }
        other => panic!("expected a timeout error, got {:?}", other),
    }
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "timeout fired after {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_error_unit_ends_answer_without_complete() {
    let server = LiveServer::start().await;
    server
        .backend
        .mock_ask_stream(&[r#"{"content":"par"}"#, r#"{"error":"model crashed"}"#])
        .await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    ask(&mut ws, constants::TEST_CHAT_ID, "Go", "q1").await;

    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(events[0], partial(constants::TEST_CHAT_ID, "q1", "par"));
    assert!(matches!(events[1], ServerEvent::Error { .. }));
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_invalid_message_is_reported_and_connection_stays_open() {
    let server = LiveServer::start().await;
    server.backend.mock_ask_stream(&[r#"{"content":"ok"}"#]).await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    ws.send(Message::Text("not json".to_string())).await.unwrap();

    match next_event(&mut ws).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("expected an error event, got {:?}", other),
    }

    send_json(
        &mut ws,
        json!({"type": "question", "chat_id": constants::TEST_CHAT_ID, "question": ""}),
    )
    .await;
    match next_event(&mut ws).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("expected an error event, got {:?}", other),
    }

    ask(&mut ws, constants::TEST_CHAT_ID, "Still there?", "q3").await;
    let events = collect_answers(&mut ws, 1).await;
    assert_eq!(events.last(), Some(&complete(constants::TEST_CHAT_ID, "q3", "ok")));
    assert_eq!(server.backend.requests_to("/ask").await.len(), 1);
}

// =============================================================================
// Ordering and isolation
// =============================================================================

#[tokio::test]
async fn test_pipelined_questions_are_not_interleaved() {
    let server = LiveServer::start().await;
    server
        .backend
        .mock_ask_stream_for_chat(
            constants::TEST_CHAT_ID,
            &[r#"{"content":"one "}"#, r#"{"content":"two"}"#],
        )
        .await;
    server
        .backend
        .mock_ask_stream_for_chat(
            constants::OTHER_CHAT_ID,
            &[r#"{"content":"three "}"#, r#"{"content":"four"}"#],
        )
        .await;

    let mut ws = connect(&server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)))).await;
    ask(&mut ws, constants::TEST_CHAT_ID, "First", "q1").await;
    ask(&mut ws, constants::OTHER_CHAT_ID, "Second", "q2").await;

    let events = collect_answers(&mut ws, 2).await;
    let ids: Vec<&str> = events.iter().filter_map(question_id_of).collect();
    assert_eq!(ids, vec!["q1", "q1", "q1", "q2", "q2", "q2"]);
    assert_eq!(events[2], complete(constants::TEST_CHAT_ID, "q1", "one two"));
    assert_eq!(
        events[5],
        complete(constants::OTHER_CHAT_ID, "q2", "three four")
    );
}

#[tokio::test]
async fn test_concurrent_connections_receive_only_their_own_events() {
    let server = LiveServer::start().await;
    server
        .backend
        .mock_ask_stream_for_chat(
            constants::TEST_CHAT_ID,
            &[r#"{"content":"alpha "}"#, r#"{"content":"answer"}"#],
        )
        .await;
    server
        .backend
        .mock_ask_stream_for_chat(
            constants::OTHER_CHAT_ID,
            &[r#"{"content":"beta "}"#, r#"{"content":"answer"}"#],
        )
        .await;

    let url = server.ws_url(Some(&format!("token={}", constants::TEST_TOKEN)));
    let mut first = connect(&url).await;
    let mut second = connect(&url).await;

    ask(&mut first, constants::TEST_CHAT_ID, "Alpha?", "a").await;
    ask(&mut second, constants::OTHER_CHAT_ID, "Beta?", "b").await;

    let (first_events, second_events) = tokio::join!(
        collect_answers(&mut first, 1),
        collect_answers(&mut second, 1)
    );

    assert!(first_events.iter().all(|e| question_id_of(e) == Some("a")));
    assert!(second_events.iter().all(|e| question_id_of(e) == Some("b")));
    assert_eq!(
        first_events.last(),
        Some(&complete(constants::TEST_CHAT_ID, "a", "alpha answer"))
    );
    assert_eq!(
        second_events.last(),
        Some(&complete(constants::OTHER_CHAT_ID, "b", "beta answer"))
    );
}
