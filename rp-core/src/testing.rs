//! Test support: a deterministic verification engine and request builders
//!
//! Available to this crate's unit tests and, through the `test-util` feature,
//! to downstream integration tests.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use uuid::Uuid;

use crate::ceremony::{
    AssertionResponse, AttestationResponse, AuthenticationCeremony, CeremonyConfig,
    CeremonyContext, FinishAuthentication, FinishRegistration, RegistrationCeremony,
};
use crate::codec::encode_base64url;
use crate::model::{CredentialRecord, UserVerification};
use crate::session::{Challenge, SessionManager, SessionScope, DEFAULT_SESSION_TTL};
use crate::store::MemoryStore;
use crate::verify::{
    AssertionRequest, AssertionVerdict, AttestationRequest, AuthenticationBegin, EngineError,
    IssuedChallenge, RegistrationBegin, VerificationEngine,
};

pub const TEST_RP_ID: &str = "localhost";
pub const TEST_ORIGIN: &str = "http://localhost:8080";

/// Accepts every well-formed response unless told otherwise.
#[derive(Debug, Default)]
pub struct StubEngine {
    reject: Mutex<Option<String>>,
    next_counter: Mutex<Option<u32>>,
    last_exclusions: Mutex<Vec<Vec<u8>>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next verification with `reason`.
    pub fn reject_next(&self, reason: &str) {
        *lock(&self.reject) = Some(reason.to_string());
    }

    /// Report `counter` from the next assertion.
    pub fn set_next_counter(&self, counter: u32) {
        *lock(&self.next_counter) = Some(counter);
    }

    /// Exclusion list passed to the most recent registration.
    pub fn last_exclusions(&self) -> Vec<Vec<u8>> {
        lock(&self.last_exclusions).clone()
    }

    fn take_rejection(&self) -> Result<(), EngineError> {
        match lock(&self.reject).take() {
            Some(reason) => Err(EngineError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fresh_challenge() -> Challenge {
    let mut bytes = Uuid::new_v4().as_bytes().to_vec();
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    Challenge::from_bytes(bytes)
}

impl VerificationEngine for StubEngine {
    fn rp_id(&self) -> &str {
        TEST_RP_ID
    }

    fn begin_registration(
        &self,
        request: RegistrationBegin<'_>,
    ) -> Result<IssuedChallenge, EngineError> {
        *lock(&self.last_exclusions) = request.exclude_credentials.clone();

        let challenge = fresh_challenge();
        let exclude: Vec<_> = request
            .exclude_credentials
            .iter()
            .map(|id| json!({ "type": "public-key", "id": encode_base64url(id) }))
            .collect();
        let options = json!({
            "challenge": challenge.encoded(),
            "rp": { "id": TEST_RP_ID, "name": "Test RP" },
            "user": {
                "id": encode_base64url(request.user_id.as_bytes()),
                "name": request.username,
                "displayName": request.display_name,
            },
            "pubKeyCredParams": [{ "type": "public-key", "alg": -7 }],
            "excludeCredentials": exclude,
            "authenticatorSelection": request.authenticator_selection,
            "attestation": request.attestation,
        });

        Ok(IssuedChallenge {
            challenge,
            options,
            state: json!({ "stub": "registration" }),
        })
    }

    fn verify_attestation(
        &self,
        request: AttestationRequest<'_>,
    ) -> Result<CredentialRecord, EngineError> {
        self.take_rejection()?;
        if request.response.attestation_object.is_empty() {
            return Err(EngineError::Malformed("empty attestation object".into()));
        }

        Ok(CredentialRecord {
            id: encode_base64url(&request.response.raw_id),
            public_key: json!({ "stub": encode_base64url(&request.response.attestation_object) }),
            sign_count: 0,
            transports: vec!["internal".into()],
            attachment: Some("platform".into()),
            attestation_type: Some("none".into()),
            created_at: None,
        })
    }

    fn begin_authentication(
        &self,
        request: AuthenticationBegin<'_>,
    ) -> Result<IssuedChallenge, EngineError> {
        if request.credentials.is_empty() {
            return Err(EngineError::NoCredentials);
        }

        let challenge = fresh_challenge();
        let allow: Vec<_> = request
            .credentials
            .iter()
            .map(|c| json!({ "type": "public-key", "id": c.id }))
            .collect();
        let options = json!({
            "challenge": challenge.encoded(),
            "rpId": TEST_RP_ID,
            "allowCredentials": allow,
            "userVerification": request.user_verification,
        });

        Ok(IssuedChallenge {
            challenge,
            options,
            state: json!({ "stub": "authentication" }),
        })
    }

    fn verify_assertion(
        &self,
        request: AssertionRequest<'_>,
    ) -> Result<AssertionVerdict, EngineError> {
        self.take_rejection()?;
        if request.response.signature.is_empty() {
            return Err(EngineError::Malformed("empty signature".into()));
        }

        let stored = request.credential.sign_count;
        let sign_count = lock(&self.next_counter)
            .take()
            .unwrap_or(if stored == 0 { 0 } else { stored + 1 });

        Ok(AssertionVerdict {
            credential_id: request.credential.id.clone(),
            sign_count,
            user_verified: request.session.user_verification == UserVerification::Required,
            updated_public_key: None,
        })
    }
}

/// Both ceremonies wired to an in-memory store and a [`StubEngine`].
#[derive(Debug, Clone)]
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sessions: Arc<SessionManager>,
    pub engine: Arc<StubEngine>,
    pub registration: RegistrationCeremony,
    pub authentication: AuthenticationCeremony,
}

pub fn harness() -> Harness {
    harness_with(CeremonyConfig::default())
}

pub fn harness_with(config: CeremonyConfig) -> Harness {
    harness_scoped(SessionScope::Keyed, config)
}

pub fn harness_scoped(scope: SessionScope, config: CeremonyConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionManager::new(scope, DEFAULT_SESSION_TTL));
    let engine = Arc::new(StubEngine::new());
    let ctx = CeremonyContext::new(
        store.clone(),
        sessions.clone(),
        crate::verify::VerificationAdapter::new(engine.clone()),
        config,
    );

    Harness {
        store,
        sessions,
        engine,
        registration: RegistrationCeremony::new(ctx.clone()),
        authentication: AuthenticationCeremony::new(ctx),
    }
}

/// Encoded `clientDataJSON` echoing `challenge`.
pub fn client_data(ceremony_type: &str, challenge: &str) -> String {
    let body = json!({
        "type": ceremony_type,
        "challenge": challenge,
        "origin": TEST_ORIGIN,
    });
    encode_base64url(body.to_string().as_bytes())
}

/// A registration Finish command for `credential_id` answering `challenge`.
pub fn attestation_for(challenge: &str, credential_id: &[u8]) -> FinishRegistration {
    let id = encode_base64url(credential_id);
    FinishRegistration {
        id: id.clone(),
        raw_id: Some(id),
        response: AttestationResponse {
            attestation_object: encode_base64url(b"stub-attestation"),
            client_data_json: client_data("webauthn.create", challenge),
        },
        extension_results: json!({}),
        credential_type: "public-key".into(),
    }
}

/// An authentication Finish command for `credential_id` answering `challenge`.
pub fn assertion_for(challenge: &str, credential_id: &[u8]) -> FinishAuthentication {
    let id = encode_base64url(credential_id);
    FinishAuthentication {
        id: id.clone(),
        raw_id: Some(id),
        response: AssertionResponse {
            authenticator_data: encode_base64url(b"stub-authenticator-data"),
            client_data_json: client_data("webauthn.get", challenge),
            signature: encode_base64url(b"stub-signature"),
            user_handle: None,
        },
        extension_results: json!({}),
        credential_type: "public-key".into(),
    }
}
