//! Signup and login endpoints
//!
//! Thin handlers: check required fields, forward to the backend, map the
//! result. Passwords are never logged.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::{
    backend::{SignupRequest, TokenResponse},
    error::{AppError, AppResult},
    AppState,
};

/// Signup request body
#[derive(Deserialize)]
pub struct SignupBody {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Login request body
///
/// The backend logs users in by `username`; browser clients may send the
/// same value as `email`.
#[derive(Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

/// Return the names of empty fields
fn missing_fields<'a>(fields: &[(&'a str, &str)]) -> Vec<&'a str> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect()
}

fn require(fields: &[(&str, &str)]) -> AppResult<()> {
    let missing = missing_fields(fields);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// POST /auth/signup
#[instrument(skip_all)]
pub async fn signup(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SignupBody>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(body) = body?;
    require(&[
        ("username", body.username.as_str()),
        ("email", body.email.as_str()),
        ("password", body.password.as_str()),
    ])?;

    let request = SignupRequest {
        username: body.username.trim().to_string(),
        email: body.email.trim().to_string(),
        password: body.password,
    };

    let created = state.backend.signup(&request).await?;
    info!(username = %request.username, "User signed up");

    Ok(Json(created))
}

/// POST /auth/login
#[instrument(skip_all)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> AppResult<Json<TokenResponse>> {
    let Json(body) = body?;
    let username = body
        .username
        .filter(|u| !u.trim().is_empty())
        .or(body.email)
        .unwrap_or_default();

    require(&[("username", username.as_str()), ("password", body.password.as_str())])?;

    let token = state.backend.login(username.trim(), &body.password).await?;
    info!(username = %username.trim(), "User logged in");

    Ok(Json(token))
}
