//! Health check endpoint
//!
//! `/health` reports version and uptime, plus whether the upload spool
//! directory is usable. The backend is not probed: its contract has no
//! health endpoint.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Individual dependency check result
#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dependency checks collection
#[derive(Debug, Serialize)]
pub struct DependencyChecks {
    pub upload_dir: DependencyCheck,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub checks: DependencyChecks,
}

async fn check_upload_dir(state: &AppState) -> DependencyCheck {
    match tokio::fs::metadata(&state.config.upload_dir).await {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => DependencyCheck {
            status: HealthStatus::Healthy,
            error: None,
        },
        Ok(_) => DependencyCheck {
            status: HealthStatus::Unhealthy,
            error: Some("upload directory is not a writable directory".to_string()),
        },
        Err(e) => DependencyCheck {
            status: HealthStatus::Unhealthy,
            error: Some(e.to_string()),
        },
    }
}

/// GET /health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let upload_dir = check_upload_dir(&state).await;
    let status = upload_dir.status.clone();

    let response = HealthResponse {
        status: status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks: DependencyChecks { upload_dir },
    };

    let status_code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}
