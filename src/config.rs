//! Configuration management for Docent
//!
//! Configuration is loaded from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Origins allowed to call the gateway from a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// `*`, any origin
    Any,
    /// Explicit list of origins
    List(Vec<String>),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Backend API base URL, without trailing slash
    pub backend_url: String,

    /// CORS origins
    pub allowed_origins: AllowedOrigins,

    /// Directory uploads are spooled to while being forwarded
    pub upload_dir: PathBuf,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,

    /// Timeout for non-streaming backend calls
    pub upstream_timeout: Duration,
    /// Longest gap tolerated between two chunks of an answer stream
    pub stream_idle_timeout: Duration,

    /// Questions a single WebSocket may have waiting behind the active one
    pub question_queue_depth: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, applying defaults for
    /// missing keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: var("DOCENT_HOST", "0.0.0.0"),
            port: var("DOCENT_PORT", "3000")
                .parse()
                .context("Invalid DOCENT_PORT")?,

            backend_url: var("BACKEND_URL", "http://127.0.0.1:8000")
                .trim_end_matches('/')
                .to_string(),

            allowed_origins: parse_origins(&var("ALLOWED_ORIGINS", "*")),

            upload_dir: var("UPLOAD_DIR", "uploads").into(),
            max_upload_bytes: var("MAX_UPLOAD_BYTES", "26214400")
                .parse()
                .context("Invalid MAX_UPLOAD_BYTES")?,

            upstream_timeout: Duration::from_secs(
                var("UPSTREAM_TIMEOUT_SECONDS", "30")
                    .parse()
                    .context("Invalid UPSTREAM_TIMEOUT_SECONDS")?,
            ),
            stream_idle_timeout: Duration::from_secs(
                var("STREAM_IDLE_TIMEOUT_SECONDS", "60")
                    .parse()
                    .context("Invalid STREAM_IDLE_TIMEOUT_SECONDS")?,
            ),

            question_queue_depth: var("QUESTION_QUEUE_DEPTH", "8")
                .parse()
                .context("Invalid QUESTION_QUEUE_DEPTH")?,
        })
    }
}

/// Parse a comma-separated origin list. Empty entries are ignored and a
/// lone `*` (or nothing at all) means any origin.
pub fn parse_origins(raw: &str) -> AllowedOrigins {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| o.trim_end_matches('/').to_string())
        .collect();

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowedOrigins::Any
    } else {
        AllowedOrigins::List(origins)
    }
}
