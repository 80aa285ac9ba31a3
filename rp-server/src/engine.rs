//! webauthn-rs backed verification engine
//!
//! Adapts the passkey flows of `webauthn-rs` to the [`VerificationEngine`]
//! seam. Ceremony state is serialised into the session (via the
//! `danger-allow-state-serialisation` feature) and credential records carry
//! the serialised [`Passkey`] as their public key material.
//!
//! Requested attachment, resident-key, user-verification and attestation
//! preferences are written into the options handed to the client. The
//! library's own passkey policy stays a floor: a requested `required` user
//! verification is additionally enforced on the assertion verdict.

use rp_core::codec::{decode_flexible_base64, encode_base64url};
use rp_core::model::{CredentialRecord, UserVerification};
use rp_core::session::Challenge;
use rp_core::verify::{
    AssertionRequest, AssertionVerdict, AttestationRequest, AuthenticationBegin, EngineError,
    IssuedChallenge, RegistrationBegin, VerificationEngine,
};
use serde_json::{json, Value};
use url::Url;
use webauthn_rs::prelude::*;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("WebAuthn error: {0:?}")]
    Webauthn(WebauthnError),
}

/// Relying party backed by a `webauthn-rs` instance
pub struct WebauthnEngine {
    rp_id: String,
    webauthn: Webauthn,
}

impl WebauthnEngine {
    /// Create a new engine
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (typically the domain name)
    /// * `rp_origin` - Relying Party origin URL
    /// * `rp_name` - Human-readable name for the Relying Party
    pub fn new(rp_id: &str, rp_origin: &str, rp_name: &str) -> Result<Self, ConfigError> {
        let origin =
            Url::parse(rp_origin).map_err(|e| ConfigError::InvalidOrigin(e.to_string()))?;

        let webauthn = WebauthnBuilder::new(rp_id, &origin)
            .and_then(|builder| builder.rp_name(rp_name).allow_subdomains(false).build())
            .map_err(ConfigError::Webauthn)?;

        Ok(Self {
            rp_id: rp_id.to_string(),
            webauthn,
        })
    }

    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }
}

impl std::fmt::Debug for WebauthnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebauthnEngine")
            .field("rp_id", &self.rp_id)
            .field("webauthn", &"<Webauthn instance>")
            .finish()
    }
}

/// Split a `{"publicKey": {...}}` challenge response into its challenge and options.
fn split_challenge_response(
    response: &impl serde::Serialize,
) -> Result<(Challenge, Value), EngineError> {
    let mut value =
        serde_json::to_value(response).map_err(|e| EngineError::State(e.to_string()))?;
    let options = value
        .get_mut("publicKey")
        .map(Value::take)
        .ok_or_else(|| EngineError::State("challenge response has no publicKey".into()))?;

    let challenge = options
        .get("challenge")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::State("options carry no challenge".into()))
        .and_then(|c| Challenge::from_encoded(c).map_err(|e| EngineError::State(e.to_string())))?;

    Ok((challenge, options))
}

fn to_state(state: &impl serde::Serialize) -> Result<Value, EngineError> {
    serde_json::to_value(state).map_err(|e| EngineError::State(e.to_string()))
}

fn from_state<T: serde::de::DeserializeOwned>(state: &Value) -> Result<T, EngineError> {
    serde_json::from_value(state.clone())
        .map_err(|e| EngineError::State(format!("unusable session state: {}", e)))
}

fn set_option(options: &mut Value, key: &str, value: Value) {
    if let Some(options) = options.as_object_mut() {
        options.insert(key.to_string(), value);
    }
}

fn extensions_or_empty(extensions: &Value) -> Value {
    if extensions.is_object() {
        extensions.clone()
    } else {
        json!({})
    }
}

impl VerificationEngine for WebauthnEngine {
    fn rp_id(&self) -> &str {
        &self.rp_id
    }

    fn begin_registration(
        &self,
        request: RegistrationBegin<'_>,
    ) -> Result<IssuedChallenge, EngineError> {
        let exclude: Vec<CredentialID> = request
            .exclude_credentials
            .into_iter()
            .map(CredentialID::from)
            .collect();
        let exclude = (!exclude.is_empty()).then_some(exclude);

        let (ccr, reg_state) = self
            .webauthn
            .start_passkey_registration(
                request.user_id,
                request.username,
                request.display_name,
                exclude,
            )
            .map_err(|e| EngineError::State(format!("{:?}", e)))?;

        let (challenge, mut options) = split_challenge_response(&ccr)?;

        let selection = request.authenticator_selection;
        if let Some(target) = options
            .get_mut("authenticatorSelection")
            .and_then(Value::as_object_mut)
        {
            if let Some(attachment) = &selection.authenticator_attachment {
                target.insert("authenticatorAttachment".into(), json!(attachment));
            }
            if let Some(resident_key) = &selection.resident_key {
                target.insert("residentKey".into(), json!(resident_key));
            }
            if let Some(require) = selection.require_resident_key {
                target.insert("requireResidentKey".into(), json!(require));
            }
            if let Some(user_verification) = selection.user_verification {
                target.insert("userVerification".into(), json!(user_verification));
            }
        }
        set_option(&mut options, "attestation", json!(request.attestation));

        Ok(IssuedChallenge {
            challenge,
            options,
            state: to_state(&reg_state)?,
        })
    }

    fn verify_attestation(
        &self,
        request: AttestationRequest<'_>,
    ) -> Result<CredentialRecord, EngineError> {
        let response = request.response;
        let reg_state: PasskeyRegistration = from_state(&request.session.engine_state)?;

        let credential: RegisterPublicKeyCredential = serde_json::from_value(json!({
            "id": response.credential_id,
            "rawId": encode_base64url(&response.raw_id),
            "type": response.credential_type,
            "response": {
                "attestationObject": encode_base64url(&response.attestation_object),
                "clientDataJSON": encode_base64url(&response.client_data_json),
            },
            "extensions": extensions_or_empty(&response.extension_results),
        }))
        .map_err(|e| EngineError::Malformed(e.to_string()))?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(&credential, &reg_state)
            .map_err(|e| EngineError::Rejected(format!("{:?}", e)))?;

        Ok(CredentialRecord {
            id: encode_base64url(passkey.cred_id()),
            public_key: to_state(&passkey)?,
            sign_count: 0,
            transports: Vec::new(),
            attachment: None,
            attestation_type: None,
            created_at: None,
        })
    }

    fn begin_authentication(
        &self,
        request: AuthenticationBegin<'_>,
    ) -> Result<IssuedChallenge, EngineError> {
        let passkeys: Vec<Passkey> = request
            .credentials
            .iter()
            .filter_map(|record| match serde_json::from_value(record.public_key.clone()) {
                Ok(passkey) => Some(passkey),
                Err(e) => {
                    tracing::warn!(
                        user_id = %request.user_id,
                        credential_id = %record.id,
                        error = %e,
                        "Skipping credential without usable key material"
                    );
                    None
                }
            })
            .collect();

        if passkeys.is_empty() {
            return Err(EngineError::NoCredentials);
        }

        let (rcr, auth_state) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| EngineError::State(format!("{:?}", e)))?;

        let (challenge, mut options) = split_challenge_response(&rcr)?;
        set_option(
            &mut options,
            "userVerification",
            json!(request.user_verification),
        );

        Ok(IssuedChallenge {
            challenge,
            options,
            state: to_state(&auth_state)?,
        })
    }

    fn verify_assertion(
        &self,
        request: AssertionRequest<'_>,
    ) -> Result<AssertionVerdict, EngineError> {
        let response = request.response;
        let auth_state: PasskeyAuthentication = from_state(&request.session.engine_state)?;
        let mut passkey: Passkey = serde_json::from_value(request.credential.public_key.clone())
            .map_err(|e| EngineError::State(format!("stored credential is unusable: {}", e)))?;

        let credential: PublicKeyCredential = serde_json::from_value(json!({
            "id": response.credential_id,
            "rawId": encode_base64url(&response.raw_id),
            "type": response.credential_type,
            "response": {
                "authenticatorData": encode_base64url(&response.authenticator_data),
                "clientDataJSON": encode_base64url(&response.client_data_json),
                "signature": encode_base64url(&response.signature),
                "userHandle": response.user_handle.as_deref().map(encode_base64url),
            },
            "extensions": extensions_or_empty(&response.extension_results),
        }))
        .map_err(|e| EngineError::Malformed(e.to_string()))?;

        let result = self
            .webauthn
            .finish_passkey_authentication(&credential, &auth_state)
            .map_err(|e| EngineError::Rejected(format!("{:?}", e)))?;

        let asserted: &[u8] = result.cred_id();
        if decode_flexible_base64(&request.credential.id).map_or(true, |id| id != asserted) {
            return Err(EngineError::Rejected(
                "assertion was made by a different credential".into(),
            ));
        }

        if request.session.user_verification == UserVerification::Required
            && !result.user_verified()
        {
            return Err(EngineError::Rejected(
                "user verification was required but not performed".into(),
            ));
        }

        passkey.update_credential(&result);

        Ok(AssertionVerdict {
            credential_id: encode_base64url(asserted),
            sign_count: result.counter(),
            user_verified: result.user_verified(),
            updated_public_key: Some(to_state(&passkey)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_core::model::{AttestationConveyance, AuthenticatorSelection};
    use uuid::Uuid;

    fn engine() -> WebauthnEngine {
        WebauthnEngine::new("localhost", "http://localhost:8080", "Test RP").unwrap()
    }

    #[test]
    fn test_rejects_invalid_origin() {
        assert!(matches!(
            WebauthnEngine::new("localhost", "not a url", "Test"),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn test_begin_registration_exposes_challenge_and_options() {
        let engine = engine();
        let selection = AuthenticatorSelection {
            authenticator_attachment: Some("platform".into()),
            ..Default::default()
        };

        let issued = engine
            .begin_registration(RegistrationBegin {
                user_id: Uuid::new_v4(),
                username: "alice",
                display_name: "Alice",
                exclude_credentials: vec![vec![1, 2, 3]],
                authenticator_selection: &selection,
                attestation: AttestationConveyance::None,
            })
            .unwrap();

        assert_eq!(
            issued.options["challenge"].as_str(),
            Some(issued.challenge.encoded().as_str())
        );
        assert_eq!(
            issued.options["authenticatorSelection"]["authenticatorAttachment"],
            "platform"
        );
        assert_eq!(issued.options["excludeCredentials"][0]["id"], "AQID");
        assert!(from_state::<PasskeyRegistration>(&issued.state).is_ok());
    }

    #[test]
    fn test_begin_registration_carries_requested_policy() {
        let engine = engine();
        let selection = AuthenticatorSelection {
            user_verification: Some(UserVerification::Required),
            ..Default::default()
        };

        let issued = engine
            .begin_registration(RegistrationBegin {
                user_id: Uuid::new_v4(),
                username: "alice",
                display_name: "Alice",
                exclude_credentials: Vec::new(),
                authenticator_selection: &selection,
                attestation: AttestationConveyance::Direct,
            })
            .unwrap();

        assert_eq!(issued.options["attestation"], "direct");
        assert_eq!(
            issued.options["authenticatorSelection"]["userVerification"],
            "required"
        );
    }

    #[test]
    fn test_request_options_take_requested_user_verification() {
        let mut options = json!({ "challenge": "AQID", "userVerification": "required" });
        set_option(
            &mut options,
            "userVerification",
            json!(UserVerification::Discouraged),
        );
        assert_eq!(options["userVerification"], "discouraged");

        let mut not_an_object = json!("x");
        set_option(&mut not_an_object, "userVerification", json!("required"));
        assert_eq!(not_an_object, json!("x"));
    }

    #[test]
    fn test_begin_authentication_without_usable_keys() {
        let engine = engine();
        let legacy = CredentialRecord {
            id: "AQID".into(),
            public_key: json!("not a passkey"),
            sign_count: 0,
            transports: Vec::new(),
            attachment: None,
            attestation_type: None,
            created_at: None,
        };

        let result = engine.begin_authentication(AuthenticationBegin {
            user_id: Uuid::new_v4(),
            credentials: &[legacy],
            user_verification: Default::default(),
        });
        assert!(matches!(result, Err(EngineError::NoCredentials)));
    }
}
