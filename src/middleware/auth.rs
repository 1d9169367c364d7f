//! Authentication middleware
//!
//! Docent does not validate tokens itself; the backend owns that. The
//! middleware only checks that a well-formed bearer credential is present and
//! hands it to the handlers, so requests without one never reach the backend.

use std::fmt;

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::AppError;

/// Opaque bearer token issued by the backend.
///
/// `Debug` is redacted so the token cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token. Returns `None` for empty or whitespace-bearing tokens.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            None
        } else {
            Some(Self(token))
        }
    }

    /// Parse an `Authorization` header value of the form `Bearer <token>`
    pub fn from_header(auth_header: &str) -> Option<Self> {
        auth_header
            .strip_prefix("Bearer ")
            .and_then(|token| Self::new(token.trim()))
    }

    /// Raw token text
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Header value to forward to the backend
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Short SHA-256 fingerprint, safe to log for correlation
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(&hasher.finalize()[..6])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Bearer middleware for authorized routes
///
/// Rejects missing headers with `Unauthorized` and malformed ones with
/// `InvalidToken`, then stores the `Credential` in request extensions.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn require_bearer(mut request: Request, next: Next) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let credential = Credential::from_header(auth_header).ok_or(AppError::InvalidToken)?;
    debug!(token_fp = %credential.fingerprint(), "Bearer credential present");

    request.extensions_mut().insert(credential);

    Ok(next.run(request).await)
}
