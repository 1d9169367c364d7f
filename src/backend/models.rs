//! Backend API request and response types
//!
//! Only the shapes Docent actually reads are typed. Chat records and
//! processing results belong to the backend and pass through as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /auth/signup`
#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/login`, sent form-encoded
#[derive(Serialize)]
pub(crate) struct LoginForm<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Body of `POST /chat`, sent form-encoded
#[derive(Serialize)]
pub(crate) struct CreateChatForm<'a> {
    pub chat_name: &'a str,
}

/// Token issued by the backend at login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Error body returned by the backend, `{"detail": ...}`
#[derive(Debug, Deserialize)]
pub(crate) struct BackendErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BackendErrorBody {
    /// Human-readable message, when the backend gave a plain string
    pub fn message(&self) -> Option<String> {
        self.detail
            .as_ref()
            .or(self.error.as_ref())
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Extract a displayable message from a raw backend error body
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<BackendErrorBody>(body)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_default()
}
