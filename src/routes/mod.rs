//! HTTP routes for Docent
//!
//! This module defines all endpoints exposed to the browser client.

pub mod auth;
pub mod chat;
pub mod health;
pub mod metrics;
pub mod upload;
pub mod ws;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{config::AllowedOrigins, middleware::auth::require_bearer, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    // Multipart framing on top of the file itself
    let upload_body_limit = state.config.max_upload_bytes.saturating_add(64 * 1024);

    // Routes that require a bearer credential
    let protected_routes = Router::new()
        .route("/api/chat", post(chat::create_chat))
        .route("/api/chat/all", get(chat::list_chats))
        .route(
            "/api/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .layer(middleware::from_fn(require_bearer));

    // Public routes
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/api/chat/summary/:chat_id", get(chat::chat_summary))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::from(Any),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(values)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
