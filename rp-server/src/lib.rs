//! RP Server Library - HTTP transport for WebAuthn relying-party ceremonies
//!
//! This library exposes the server components for use in integration tests
//! and the `rp-admin` tool. The main binary uses these same components.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;

pub use config::Config;
pub use db::PgCredentialStore;
pub use engine::{ConfigError, WebauthnEngine};
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::AppState;
