//! Docent - gateway between a browser chat client and a document
//! question-answering backend
//!
//! Handles signup and login, relays file uploads, and streams answers to
//! questions over a WebSocket. All substantive work happens in the backend;
//! this crate validates, forwards and relays.

pub mod backend;
pub mod config;
pub mod error;
pub mod middleware;
pub mod relay;
pub mod routes;
pub mod streaming;
pub mod upload;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub use crate::backend::BackendClient;
pub use crate::config::Config;

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    /// The one backend client, built at startup
    pub backend: Arc<BackendClient>,
}

impl AppState {
    /// Create a new application state
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.upload_dir)
            .await
            .with_context(|| format!("Failed to create upload dir {}", config.upload_dir.display()))?;

        // No overall timeout on the client: answer streams are long-lived.
        // Non-streaming calls set their own per-request timeout.
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let backend = Arc::new(BackendClient::new(http_client, &config));

        Ok(Self {
            config,
            start_time: Instant::now(),
            backend,
        })
    }
}
