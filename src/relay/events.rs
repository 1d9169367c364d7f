//! Realtime protocol messages
//!
//! Client -> server:
//! `{"type":"question","chat_id":"c1","question":"...","question_id":"q1","token":"..."}`
//!
//! Server -> client: `partial`, `complete` and `error` events, each tagged
//! with the chat id and, when the client supplied one, the question id.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Messages sent from the client over the WebSocket
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask a question about a chat's documents
    Question {
        #[serde(default)]
        chat_id: String,
        #[serde(default)]
        question: String,
        #[serde(default)]
        question_id: Option<String>,
        /// Overrides the credential given at connect time
        #[serde(default)]
        token: Option<String>,
    },
}

/// Events sent from the server over the WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// One fragment of an answer, in arrival order
    Partial {
        chat_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        content: String,
    },
    /// The answer finished; `answer` is every fragment concatenated
    Complete {
        chat_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        answer: String,
    },
    /// The question failed or the message was rejected
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// Build an error event from an application error
    pub fn from_error(
        chat_id: Option<String>,
        question_id: Option<String>,
        error: &AppError,
    ) -> Self {
        ServerEvent::Error {
            chat_id,
            question_id,
            code: error.code().to_string(),
            message: error.public_message(),
        }
    }

    /// Build an error event with an explicit code
    pub fn error(
        chat_id: Option<String>,
        question_id: Option<String>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        ServerEvent::Error {
            chat_id,
            question_id,
            code: code.to_string(),
            message: message.into(),
        }
    }
}
