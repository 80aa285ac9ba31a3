//! Database module
//!
//! PostgreSQL implementation of the credential store.

pub mod user;

pub use user::PgCredentialStore;
