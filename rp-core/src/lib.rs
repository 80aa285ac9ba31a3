//! RP Core - WebAuthn relying-party ceremony orchestration
//!
//! This crate drives the two WebAuthn ceremonies (registration and
//! authentication) between a browser client, a credential store and an
//! external verification engine. It owns challenge issuance bookkeeping,
//! session tracking, wire decoding and credential-blob persistence; the
//! cryptographic verdicts come from a [`VerificationEngine`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rp_core::{
//!     CeremonyConfig, CeremonyContext, MemoryStore, RegistrationCeremony, SessionManager,
//!     StartRegistration, VerificationAdapter, VerificationEngine,
//! };
//!
//! # async fn example(engine: Arc<dyn VerificationEngine>) -> rp_core::Result<()> {
//! let ctx = CeremonyContext::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SessionManager::default()),
//!     VerificationAdapter::new(engine),
//!     CeremonyConfig::default(),
//! );
//!
//! let registration = RegistrationCeremony::new(ctx);
//! let started = registration
//!     .start(StartRegistration {
//!         username: "alice".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("challenge: {}", started.challenge);
//! # Ok(())
//! # }
//! ```

pub mod ceremony;
pub mod codec;
pub mod error;
pub mod model;
pub mod session;
pub mod store;
pub mod verify;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use ceremony::{
    AssertionResponse, AttestationResponse, AuthenticationCeremony, AuthenticationOutcome,
    AuthenticationPhase, CeremonyConfig, CeremonyContext, FinishAuthentication,
    FinishRegistration, RegistrationCeremony, RegistrationOutcome, RegistrationPhase,
    StartAuthentication, StartAuthenticationOutcome, StartRegistration,
    StartRegistrationOutcome,
};
pub use codec::{
    decode_credential_blob, decode_flexible_base64, encode_base64url, encode_credential_blob,
    DecodeError,
};
pub use error::{CeremonyError, Result};
pub use model::{
    AttestationConveyance, AuthenticatorSelection, CeremonyKind, CredentialRecord, NewUser,
    User, UserUpdate, UserVerification,
};
pub use session::{Challenge, Session, SessionError, SessionManager, SessionScope};
pub use store::{CredentialStore, MemoryStore, StoreError};
pub use verify::{
    AssertionRequest, AssertionVerdict, AttestationRequest, AuthenticationBegin,
    DecodedAssertion, DecodedAttestation, EngineError, IssuedChallenge, RegistrationBegin,
    VerificationAdapter, VerificationEngine,
};
