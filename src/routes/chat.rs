//! Chat management endpoints
//!
//! Chats are owned by the backend; these handlers only forward.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::{
    error::{AppError, AppResult},
    middleware::Credential,
    AppState,
};

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct CreateChatBody {
    #[serde(default)]
    pub chat_name: String,
}

/// POST /api/chat
#[instrument(skip_all)]
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    body: Result<Json<CreateChatBody>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(body) = body?;
    let chat_name = body.chat_name.trim();
    if chat_name.is_empty() {
        return Err(AppError::Validation("chat_name is required".to_string()));
    }

    let chat = state.backend.create_chat(&credential, chat_name).await?;
    info!(chat_name = %chat_name, "Chat created");

    Ok(Json(chat))
}

/// GET /api/chat/all
#[instrument(skip_all)]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
) -> AppResult<Json<Value>> {
    Ok(Json(state.backend.list_chats(&credential).await?))
}

/// GET /api/chat/summary/:chat_id
#[instrument(skip(state))]
pub async fn chat_summary(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> AppResult<Json<Value>> {
    if chat_id.trim().is_empty() {
        return Err(AppError::Validation("chat_id is required".to_string()));
    }

    Ok(Json(state.backend.chat_summary(&chat_id).await?))
}
