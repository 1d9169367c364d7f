//! Middleware module
//!
//! Contains the bearer-credential middleware for authorized routes.

pub mod auth;

pub use auth::Credential;
