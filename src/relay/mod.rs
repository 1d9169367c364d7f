//! Realtime question/answer relay
//!
//! Each WebSocket connection gets one worker that takes admitted questions
//! off a bounded queue and relays their answers one at a time. Serializing
//! per connection keeps at most one backend stream in flight per client and
//! guarantees fragments of different questions are never interleaved.

pub mod answer;
pub mod events;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    backend::BackendClient, error::AppError, middleware::Credential,
    routes::metrics::record_upstream,
};

pub use answer::{relay_answer, AnswerOutcome, AnswerSink};
pub use events::{ClientMessage, ServerEvent};

/// A validated question waiting for the worker
#[derive(Debug, Clone)]
pub struct Question {
    pub chat_id: String,
    pub question_id: Option<String>,
    pub text: String,
    pub credential: Credential,
}

/// Parse a token given outside an `Authorization` header, with or without
/// the `Bearer ` prefix.
pub fn credential_from_token(token: &str) -> Option<Credential> {
    Credential::from_header(token).or_else(|| Credential::new(token.trim()))
}

/// Validate a raw client message and turn it into a question.
///
/// Rejections come back as the error event to send; no backend call is made
/// for them.
pub fn admit(raw: &str, connection_credential: Option<&Credential>) -> Result<Question, ServerEvent> {
    let message: ClientMessage = serde_json::from_str(raw).map_err(|e| {
        ServerEvent::error(
            None,
            None,
            "VALIDATION_ERROR",
            format!("Malformed message: {}", e),
        )
    })?;

    let ClientMessage::Question {
        chat_id,
        question,
        question_id,
        token,
    } = message;

    let chat_id = chat_id.trim().to_string();
    let reject = |code: &str, message: &str| {
        ServerEvent::error(
            (!chat_id.is_empty()).then(|| chat_id.clone()),
            question_id.clone(),
            code,
            message,
        )
    };

    if chat_id.is_empty() {
        return Err(reject("VALIDATION_ERROR", "chat_id is required"));
    }
    if question.trim().is_empty() {
        return Err(reject("VALIDATION_ERROR", "question is required"));
    }

    let credential = match token {
        Some(token) => credential_from_token(&token)
            .ok_or_else(|| reject("INVALID_TOKEN", "Invalid authentication token"))?,
        None => connection_credential
            .cloned()
            .ok_or_else(|| reject("UNAUTHORIZED", "Authentication required"))?,
    };

    Ok(Question {
        chat_id,
        question_id,
        text: question,
        credential,
    })
}

/// Process one connection's questions in order until the queue closes or the
/// connection is cancelled.
pub async fn run_questions(
    backend: Arc<BackendClient>,
    mut questions: mpsc::Receiver<Question>,
    events: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    idle_timeout: Duration,
) {
    loop {
        let question = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            question = questions.recv() => match question {
                Some(question) => question,
                None => return,
            },
        };

        if answer_question(&backend, &question, &events, &cancel, idle_timeout).await
            == AnswerOutcome::Cancelled
        {
            return;
        }
    }
}

#[instrument(
    skip_all,
    fields(
        chat_id = %question.chat_id,
        question_id = ?question.question_id,
        token_fp = %question.credential.fingerprint()
    )
)]
async fn answer_question(
    backend: &BackendClient,
    question: &Question,
    events: &mpsc::Sender<ServerEvent>,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> AnswerOutcome {
    info!(question_len = question.text.len(), "Relaying question");

    let sink = AnswerSink {
        chat_id: &question.chat_id,
        question_id: question.question_id.as_deref(),
        events,
    };

    // The idle timeout also bounds the wait for response headers
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return AnswerOutcome::Cancelled,
        opened = tokio::time::timeout(
            idle_timeout,
            backend.ask_stream(&question.credential, &question.chat_id, &question.text),
        ) => opened,
    };

    let opened = opened.unwrap_or_else(|_| {
        record_upstream("ask", "timeout", idle_timeout.as_secs_f64());
        Err(AppError::UpstreamTimeout(
            "no answer stream before the idle timeout".to_string(),
        ))
    });

    let stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Could not open answer stream");
            return if sink.fail(&e).await {
                AnswerOutcome::Failed
            } else {
                AnswerOutcome::Cancelled
            };
        }
    };

    let outcome = relay_answer(stream, &sink, cancel, idle_timeout).await;
    match &outcome {
        AnswerOutcome::Completed(answer) => info!(answer_len = answer.len(), "Answer relayed"),
        AnswerOutcome::Failed => info!("Answer ended with an error"),
        AnswerOutcome::Cancelled => info!("Connection closed, answer abandoned"),
    }
    outcome
}
