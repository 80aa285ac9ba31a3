//! Verification adapter
//!
//! The cryptographic work (COSE key parsing, attestation statement formats,
//! signature checks) belongs to an external engine behind
//! [`VerificationEngine`]. The adapter hands it already-decoded buffers plus the
//! issuing session, and folds its verdict into [`CeremonyError`]. It holds no
//! state of its own.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CeremonyError, Result};
use crate::model::{AttestationConveyance, AuthenticatorSelection, CredentialRecord, UserVerification};
use crate::session::{Challenge, Session};

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The response is well-formed but did not verify
    #[error("rejected: {0}")]
    Rejected(String),

    /// The response could not be assembled into the engine's input shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Stored session or credential state is unusable
    #[error("invalid state: {0}")]
    State(String),

    #[error("no usable credentials")]
    NoCredentials,
}

/// What the engine needs to issue registration options.
#[derive(Debug)]
pub struct RegistrationBegin<'a> {
    pub user_id: Uuid,
    pub username: &'a str,
    pub display_name: &'a str,
    /// Raw IDs of credentials that must not be registered again
    pub exclude_credentials: Vec<Vec<u8>>,
    pub authenticator_selection: &'a AuthenticatorSelection,
    pub attestation: AttestationConveyance,
}

/// What the engine needs to issue assertion options.
#[derive(Debug)]
pub struct AuthenticationBegin<'a> {
    pub user_id: Uuid,
    pub credentials: &'a [CredentialRecord],
    pub user_verification: UserVerification,
}

/// A freshly issued challenge plus everything the client and the engine need.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge: Challenge,
    /// `publicKey` options handed to `navigator.credentials.*`
    pub options: serde_json::Value,
    /// Opaque engine state, kept in the session until Finish
    pub state: serde_json::Value,
}

/// Decoded attestation response fields.
#[derive(Debug, Clone)]
pub struct DecodedAttestation {
    pub credential_id: String,
    pub raw_id: Vec<u8>,
    pub credential_type: String,
    pub client_data_json: Vec<u8>,
    pub attestation_object: Vec<u8>,
    pub extension_results: serde_json::Value,
}

/// Decoded assertion response fields.
#[derive(Debug, Clone)]
pub struct DecodedAssertion {
    pub credential_id: String,
    pub raw_id: Vec<u8>,
    pub credential_type: String,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
    pub extension_results: serde_json::Value,
}

/// Attestation verification input as the engine receives it.
#[derive(Debug)]
pub struct AttestationRequest<'a> {
    pub response: &'a DecodedAttestation,
    pub session: &'a Session,
}

/// Assertion verification input as the engine receives it.
#[derive(Debug)]
pub struct AssertionRequest<'a> {
    pub response: &'a DecodedAssertion,
    pub session: &'a Session,
    /// The stored record the assertion claims to be signed by
    pub credential: &'a CredentialRecord,
}

/// Outcome of a verified assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionVerdict {
    /// Credential ID (base64url)
    pub credential_id: String,
    /// Signature counter reported by the authenticator
    pub sign_count: u32,
    pub user_verified: bool,
    /// Updated key material, when the engine tracks more than the counter
    pub updated_public_key: Option<serde_json::Value>,
}

/// External credential verification engine.
pub trait VerificationEngine: Send + Sync {
    /// Relying party ID the engine verifies against
    fn rp_id(&self) -> &str;

    fn begin_registration(
        &self,
        request: RegistrationBegin<'_>,
    ) -> std::result::Result<IssuedChallenge, EngineError>;

    fn verify_attestation(
        &self,
        request: AttestationRequest<'_>,
    ) -> std::result::Result<CredentialRecord, EngineError>;

    fn begin_authentication(
        &self,
        request: AuthenticationBegin<'_>,
    ) -> std::result::Result<IssuedChallenge, EngineError>;

    fn verify_assertion(
        &self,
        request: AssertionRequest<'_>,
    ) -> std::result::Result<AssertionVerdict, EngineError>;
}

#[derive(Clone)]
pub struct VerificationAdapter {
    engine: Arc<dyn VerificationEngine>,
}

impl VerificationAdapter {
    pub fn new(engine: Arc<dyn VerificationEngine>) -> Self {
        Self { engine }
    }

    pub fn rp_id(&self) -> &str {
        self.engine.rp_id()
    }

    pub fn issue_registration(&self, request: RegistrationBegin<'_>) -> Result<IssuedChallenge> {
        self.engine
            .begin_registration(request)
            .map_err(|e| map_begin_error("registration", e))
    }

    pub fn issue_authentication(&self, request: AuthenticationBegin<'_>) -> Result<IssuedChallenge> {
        self.engine
            .begin_authentication(request)
            .map_err(|e| map_begin_error("authentication", e))
    }

    pub fn verify_attestation(
        &self,
        response: &DecodedAttestation,
        session: &Session,
    ) -> Result<CredentialRecord> {
        tracing::debug!(
            credential_id = %response.credential_id,
            client_data_len = response.client_data_json.len(),
            attestation_object_len = response.attestation_object.len(),
            "Submitting attestation to verification engine"
        );

        let mut record = self
            .engine
            .verify_attestation(AttestationRequest { response, session })
            .map_err(map_finish_error)?;

        if record.created_at.is_none() {
            record.created_at = Some(chrono::Utc::now());
        }
        Ok(record)
    }

    pub fn verify_assertion(
        &self,
        response: &DecodedAssertion,
        session: &Session,
        credential: &CredentialRecord,
    ) -> Result<AssertionVerdict> {
        tracing::debug!(
            credential_id = %response.credential_id,
            authenticator_data_len = response.authenticator_data.len(),
            signature_len = response.signature.len(),
            "Submitting assertion to verification engine"
        );

        self.engine
            .verify_assertion(AssertionRequest {
                response,
                session,
                credential,
            })
            .map_err(map_finish_error)
    }
}

impl std::fmt::Debug for VerificationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationAdapter")
            .field("rp_id", &self.engine.rp_id())
            .finish()
    }
}

fn map_begin_error(kind: &str, err: EngineError) -> CeremonyError {
    match err {
        EngineError::NoCredentials => {
            CeremonyError::NotFound("user has no registered credentials".into())
        }
        other => CeremonyError::verification(format!("failed to begin {}: {}", kind, other)),
    }
}

fn map_finish_error(err: EngineError) -> CeremonyError {
    match err {
        EngineError::Malformed(reason) => CeremonyError::validation(reason),
        other => CeremonyError::verification(other.to_string()),
    }
}
