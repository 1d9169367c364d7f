//! Backend API integration module
//!
//! Provides the client for the external document question-answering service.

pub mod client;
pub mod models;

pub use client::{BackendClient, ByteStream};
pub use models::{SignupRequest, TokenResponse};
