//! Realtime WebSocket endpoint
//!
//! One connection carries any number of questions. The read loop admits
//! questions onto the connection's queue, a worker relays answers one at a
//! time, and a writer task owns the socket's send half. Closing the socket
//! cancels the connection token, which stops the worker and abandons any
//! in-flight backend stream.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{AppError, AppResult},
    middleware::Credential,
    relay::{self, Question, ServerEvent},
    routes::metrics::{connection_closed, connection_opened},
    AppState,
};

/// Events buffered between the relay and a slow socket
const EVENT_BUFFER: usize = 64;

/// Query parameters for `/ws`
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Credential for clients that cannot set headers on the upgrade
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /ws
///
/// A malformed `Authorization` header is rejected before upgrading. A missing
/// credential is not: the client may still send one with each question.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let credential = connection_credential(&headers, &query)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, credential)))
}

fn connection_credential(headers: &HeaderMap, query: &WsQuery) -> AppResult<Option<Credential>> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let credential = value
            .to_str()
            .ok()
            .and_then(Credential::from_header)
            .ok_or(AppError::InvalidToken)?;
        return Ok(Some(credential));
    }

    match query.token.as_deref() {
        Some(token) => relay::credential_from_token(token)
            .map(Some)
            .ok_or(AppError::InvalidToken),
        None => Ok(None),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, credential: Option<Credential>) {
    connection_opened();
    info!(
        authenticated = credential.is_some(),
        "Realtime client connected"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER);
    let (question_tx, question_rx) =
        mpsc::channel::<Question>(state.config.question_queue_depth.max(1));

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = writer_cancel.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to serialize realtime event");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text)).await.is_err() {
                debug!("Realtime client stopped receiving");
                writer_cancel.cancel();
                break;
            }
        }
    });

    let worker = tokio::spawn(relay::run_questions(
        state.backend.clone(),
        question_rx,
        event_tx.clone(),
        cancel.clone(),
        state.config.stream_idle_timeout,
    ));

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = ws_receiver.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if !enqueue(&text, credential.as_ref(), &question_tx, &event_tx).await {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "Realtime socket error");
                break;
            }
        }
    }

    cancel.cancel();
    drop(question_tx);
    drop(event_tx);
    if let Err(e) = worker.await {
        error!(error = %e, "Relay worker panicked");
    }
    let _ = writer.await;

    connection_closed();
    info!("Realtime client disconnected");
}

/// Admit one client message. Returns `false` once the connection is gone.
async fn enqueue(
    raw: &str,
    credential: Option<&Credential>,
    questions: &mpsc::Sender<Question>,
    events: &mpsc::Sender<ServerEvent>,
) -> bool {
    let question = match relay::admit(raw, credential) {
        Ok(question) => question,
        Err(rejection) => return events.send(rejection).await.is_ok(),
    };

    match questions.try_send(question) {
        Ok(()) => true,
        Err(TrySendError::Full(question)) => {
            warn!(chat_id = %question.chat_id, "Question queue full");
            events
                .send(ServerEvent::error(
                    Some(question.chat_id),
                    question.question_id,
                    "QUEUE_FULL",
                    "Too many questions waiting on this connection",
                ))
                .await
                .is_ok()
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
