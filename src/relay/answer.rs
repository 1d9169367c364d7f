//! Relay of one streaming answer
//!
//! Drives a single question through Streaming back to Idle: every fragment is
//! forwarded as a `partial` event in arrival order, then exactly one terminal
//! event follows, `complete` on end of stream or `error` on failure. Nothing
//! is sent once the connection's cancellation token fires.

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    relay::events::ServerEvent,
    routes::metrics::{record_fragment, record_parse_error},
    streaming::{parse_unit, LineBuffer, StreamUnit},
};

/// How a relayed answer ended
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// End of stream reached; holds the aggregated answer
    Completed(String),
    /// An error event was sent
    Failed,
    /// The connection went away; nothing more was sent
    Cancelled,
}

/// Where a question's events go
pub struct AnswerSink<'a> {
    pub chat_id: &'a str,
    pub question_id: Option<&'a str>,
    pub events: &'a mpsc::Sender<ServerEvent>,
}

impl AnswerSink<'_> {
    async fn send(&self, event: ServerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn partial(&self, content: &str) -> bool {
        self.send(ServerEvent::Partial {
            chat_id: self.chat_id.to_string(),
            question_id: self.question_id.map(str::to_string),
            content: content.to_string(),
        })
        .await
    }

    async fn complete(&self, answer: &str) -> bool {
        self.send(ServerEvent::Complete {
            chat_id: self.chat_id.to_string(),
            question_id: self.question_id.map(str::to_string),
            answer: answer.to_string(),
        })
        .await
    }

    /// Report an application error as this question's terminal event
    pub async fn fail(&self, error: &AppError) -> bool {
        self.send(ServerEvent::from_error(
            Some(self.chat_id.to_string()),
            self.question_id.map(str::to_string),
            error,
        ))
        .await
    }

    async fn error(&self, code: &str, message: impl Into<String>) -> bool {
        self.send(ServerEvent::error(
            Some(self.chat_id.to_string()),
            self.question_id.map(str::to_string),
            code,
            message,
        ))
        .await
    }
}

enum Step {
    Continue,
    Stop(AnswerOutcome),
}

/// Relay one answer stream to the sink.
///
/// A unit that is not valid JSON is logged, counted and dropped; it never
/// ends the answer.
pub async fn relay_answer<S, E>(
    mut stream: S,
    sink: &AnswerSink<'_>,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> AnswerOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut buffer = LineBuffer::new();
    let mut answer = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AnswerOutcome::Cancelled,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => {
                warn!(chat_id = %sink.chat_id, "Answer stream went idle");
                return terminal_error(sink, "UPSTREAM_TIMEOUT", "Upstream service timed out").await;
            }
            Ok(Some(Err(e))) => {
                warn!(chat_id = %sink.chat_id, error = %e, "Answer stream failed");
                return terminal_error(sink, "UPSTREAM_UNAVAILABLE", "Upstream service unavailable")
                    .await;
            }
            Ok(Some(Ok(bytes))) => {
                for line in buffer.feed(&bytes) {
                    if let Step::Stop(outcome) = handle_line(&line, sink, &mut answer).await {
                        return outcome;
                    }
                }
            }
            Ok(None) => {
                if let Some(line) = buffer.finish() {
                    if let Step::Stop(outcome) = handle_line(&line, sink, &mut answer).await {
                        return outcome;
                    }
                }

                debug!(chat_id = %sink.chat_id, answer_len = answer.len(), "Answer stream complete");
                return if sink.complete(&answer).await {
                    AnswerOutcome::Completed(answer)
                } else {
                    AnswerOutcome::Cancelled
                };
            }
        }
    }
}

async fn handle_line(line: &[u8], sink: &AnswerSink<'_>, answer: &mut String) -> Step {
    match parse_unit(line) {
        Ok(StreamUnit::Fragment(content)) => {
            if content.is_empty() {
                return Step::Continue;
            }
            answer.push_str(&content);
            record_fragment();
            if sink.partial(&content).await {
                Step::Continue
            } else {
                Step::Stop(AnswerOutcome::Cancelled)
            }
        }
        Ok(StreamUnit::Failed(message)) => {
            warn!(chat_id = %sink.chat_id, message = %message, "Backend reported an error mid-stream");
            Step::Stop(terminal_error(sink, "UPSTREAM_REJECTED", message).await)
        }
        Ok(StreamUnit::Ignored) => Step::Continue,
        Err(e) => {
            record_parse_error();
            warn!(
                chat_id = %sink.chat_id,
                error = %e,
                unit_len = line.len(),
                "Dropping malformed answer chunk"
            );
            Step::Continue
        }
    }
}

async fn terminal_error(sink: &AnswerSink<'_>, code: &str, message: impl Into<String>) -> AnswerOutcome {
    if sink.error(code, message).await {
        AnswerOutcome::Failed
    } else {
        AnswerOutcome::Cancelled
    }
}
