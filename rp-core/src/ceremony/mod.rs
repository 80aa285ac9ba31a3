//! Registration and authentication ceremonies
//!
//! Each ceremony is a two-step state machine. Start issues a challenge and
//! persists it on the user row before returning; Finish matches the echoed
//! challenge against a pending session, resolves the user, and delegates the
//! cryptographic verdict to the [`VerificationAdapter`].

mod authentication;
mod registration;

pub use authentication::{
    AssertionResponse, AuthenticationCeremony, AuthenticationOutcome, AuthenticationPhase,
    FinishAuthentication, StartAuthentication, StartAuthenticationOutcome,
};
pub use registration::{
    AttestationResponse, FinishRegistration, RegistrationCeremony, RegistrationOutcome,
    RegistrationPhase, StartRegistration, StartRegistrationOutcome,
};

use std::sync::Arc;

use crate::codec::decode_flexible_base64;
use crate::error::{CeremonyError, Result};
use crate::session::{Challenge, SessionManager};
use crate::store::CredentialStore;
use crate::verify::VerificationAdapter;

/// Credential type every response must carry
pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

/// Upper bound on username length
pub const MAX_USERNAME_LEN: usize = 64;

/// Ceremony behaviour switches
#[derive(Debug, Clone)]
pub struct CeremonyConfig {
    /// Clear the user's stored challenge after a successful Finish
    pub purge_consumed_challenges: bool,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            purge_consumed_challenges: true,
        }
    }
}

/// Collaborators shared by both ceremonies.
#[derive(Clone)]
pub struct CeremonyContext {
    pub store: Arc<dyn CredentialStore>,
    pub sessions: Arc<SessionManager>,
    pub verifier: VerificationAdapter,
    pub config: CeremonyConfig,
}

impl CeremonyContext {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionManager>,
        verifier: VerificationAdapter,
        config: CeremonyConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            verifier,
            config,
        }
    }
}

impl std::fmt::Debug for CeremonyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyContext")
            .field("store", &self.store.backend())
            .field("sessions", &self.sessions)
            .field("verifier", &self.verifier)
            .field("config", &self.config)
            .finish()
    }
}

/// Decode a base64url wire field, padded or not.
pub(crate) fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>> {
    decode_flexible_base64(value).map_err(CeremonyError::decode_field(field))
}

/// Decode `clientDataJSON` and pull out the echoed challenge.
///
/// Returns the raw client-data bytes alongside the decoded challenge.
pub(crate) fn read_client_data(encoded: &str) -> Result<(Vec<u8>, Challenge)> {
    let bytes = decode_field("clientDataJSON", encoded)?;

    let client_data: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| CeremonyError::decode("clientDataJSON", e))?;
    tracing::debug!(client_data = %client_data, "Decoded client data");

    let challenge = client_data
        .get("challenge")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CeremonyError::validation("challenge is missing or not a string"))?;

    let challenge = Challenge::from_encoded(challenge)
        .map_err(|_| CeremonyError::ChallengeMismatch("challenge is not valid base64url".into()))?;

    Ok((bytes, challenge))
}

pub(crate) fn validate_username(username: &str) -> Result<&str> {
    let username = username.trim();
    if username.is_empty() {
        return Err(CeremonyError::validation("username is required"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(CeremonyError::validation(format!(
            "username exceeds {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(CeremonyError::validation(
            "username contains control characters",
        ));
    }
    Ok(username)
}

pub(crate) fn validate_credential(id: &str, credential_type: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CeremonyError::validation("credential id is required"));
    }
    if !credential_type.is_empty() && credential_type != PUBLIC_KEY_CREDENTIAL_TYPE {
        return Err(CeremonyError::validation(format!(
            "unsupported credential type: {}",
            credential_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_base64url;

    #[test]
    fn test_read_client_data_extracts_challenge() {
        let encoded = encode_base64url(br#"{"type":"webauthn.get","challenge":"AQID"}"#);
        let (bytes, challenge) = read_client_data(&encoded).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(challenge.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_read_client_data_errors() {
        assert!(matches!(
            read_client_data("%%%"),
            Err(CeremonyError::Decode { field: "clientDataJSON", .. })
        ));
        assert!(matches!(
            read_client_data(&encode_base64url(b"not json")),
            Err(CeremonyError::Decode { .. })
        ));
        assert!(matches!(
            read_client_data(&encode_base64url(br#"{"type":"webauthn.get"}"#)),
            Err(CeremonyError::Validation(_))
        ));
        assert!(matches!(
            read_client_data(&encode_base64url(br#"{"challenge":42}"#)),
            Err(CeremonyError::Validation(_))
        ));
        assert!(matches!(
            read_client_data(&encode_base64url(br#"{"challenge":"***"}"#)),
            Err(CeremonyError::ChallengeMismatch(_))
        ));
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("   ").is_err());
        assert!(validate_username(&"x".repeat(MAX_USERNAME_LEN + 1)).is_err());
        assert!(validate_username("bad\nname").is_err());
    }

    #[test]
    fn test_validate_credential() {
        assert!(validate_credential("AQI", "public-key").is_ok());
        assert!(validate_credential("AQI", "").is_ok());
        assert!(validate_credential("", "public-key").is_err());
        assert!(validate_credential("AQI", "password").is_err());
    }
}
