//! Registration (attestation) ceremony
//!
//! `Started -> AwaitingVerification -> Committed`, or `Failed` from any step.
//! A user row created by Start is not removed when Finish fails.

use uuid::Uuid;

use super::{
    decode_field, read_client_data, validate_credential, validate_username, CeremonyContext,
};
use crate::codec::encode_credential_blob;
use crate::error::{CeremonyError, Result};
use crate::model::{
    AttestationConveyance, AuthenticatorSelection, CeremonyKind, NewUser, UserUpdate,
};
use crate::session::SessionOptions;
use crate::verify::{DecodedAttestation, RegistrationBegin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPhase {
    Started,
    AwaitingVerification,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct StartRegistration {
    pub username: String,
    pub display_name: String,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: AttestationConveyance,
}

#[derive(Debug, Clone)]
pub struct StartRegistrationOutcome {
    pub user_id: Uuid,
    /// Challenge as issued (base64url)
    pub challenge: String,
    /// `publicKeyCredentialCreationOptions`
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct AttestationResponse {
    pub attestation_object: String,
    pub client_data_json: String,
}

#[derive(Debug, Clone, Default)]
pub struct FinishRegistration {
    pub id: String,
    pub raw_id: Option<String>,
    pub response: AttestationResponse,
    pub extension_results: serde_json::Value,
    pub credential_type: String,
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub phase: RegistrationPhase,
    pub user_id: Uuid,
    pub username: String,
    pub credential_id: String,
    pub credential_count: usize,
}

#[derive(Debug, Clone)]
pub struct RegistrationCeremony {
    ctx: CeremonyContext,
}

impl RegistrationCeremony {
    pub fn new(ctx: CeremonyContext) -> Self {
        Self { ctx }
    }

    /// Issue creation options for a brand-new user and persist that user.
    ///
    /// A taken username fails with a storage error; adding an authenticator
    /// to an existing account is not possible through this ceremony.
    pub async fn start(&self, cmd: StartRegistration) -> Result<StartRegistrationOutcome> {
        let username = validate_username(&cmd.username)?.to_string();
        let display_name = match cmd.display_name.trim() {
            "" => username.clone(),
            name => name.to_string(),
        };
        let user_id = Uuid::new_v4();

        // A new user owns no credentials yet, so nothing is excluded
        let issued = self.ctx.verifier.issue_registration(RegistrationBegin {
            user_id,
            username: &username,
            display_name: &display_name,
            exclude_credentials: Vec::new(),
            authenticator_selection: &cmd.authenticator_selection,
            attestation: cmd.attestation,
        })?;
        let challenge = issued.challenge.encoded();

        // The challenge must be durable before the client can echo it back
        self.ctx
            .store
            .create_user(NewUser {
                id: user_id,
                username: username.clone(),
                display_name,
                challenge: Some(challenge.clone()),
                credential_blob: "[]".to_string(),
            })
            .await
            .map_err(|e| CeremonyError::Storage(e.to_string()))?;

        self.ctx.sessions.begin_session(
            CeremonyKind::Registration,
            SessionOptions {
                challenge: issued.challenge,
                rp_id: self.ctx.verifier.rp_id().to_string(),
                user_id,
                user_verification: cmd
                    .authenticator_selection
                    .user_verification
                    .unwrap_or_default(),
                engine_state: issued.state,
            },
        );

        tracing::info!(
            user_id = %user_id,
            username = %username,
            phase = ?RegistrationPhase::Started,
            "Registration started"
        );

        Ok(StartRegistrationOutcome {
            user_id,
            challenge,
            options: issued.options,
        })
    }

    /// Verify the attestation and append the new credential to the user's blob.
    pub async fn finish(&self, cmd: FinishRegistration) -> Result<RegistrationOutcome> {
        let mut phase = RegistrationPhase::Started;
        match self.finish_inner(cmd, &mut phase).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(
                    reached = ?phase,
                    phase = ?RegistrationPhase::Failed,
                    error = %err,
                    "Registration failed"
                );
                Err(err)
            }
        }
    }

    async fn finish_inner(
        &self,
        cmd: FinishRegistration,
        phase: &mut RegistrationPhase,
    ) -> Result<RegistrationOutcome> {
        validate_credential(&cmd.id, &cmd.credential_type)?;

        let (client_data_json, challenge) = read_client_data(&cmd.response.client_data_json)?;
        let session = self
            .ctx
            .sessions
            .take_session(CeremonyKind::Registration, &challenge)?;
        *phase = RegistrationPhase::AwaitingVerification;

        let attestation_object =
            decode_field("attestationObject", &cmd.response.attestation_object)?;
        let raw_id = decode_field("id", cmd.raw_id.as_deref().unwrap_or(&cmd.id))?;

        let user = self
            .ctx
            .store
            .get_user_by_challenge(&challenge.encoded())
            .await?;
        if user.id != session.user_id {
            return Err(CeremonyError::ChallengeMismatch(
                "challenge is bound to a different user".into(),
            ));
        }

        let response = DecodedAttestation {
            credential_id: cmd.id,
            raw_id,
            credential_type: cmd.credential_type,
            client_data_json,
            attestation_object,
            extension_results: cmd.extension_results,
        };
        let record = self.ctx.verifier.verify_attestation(&response, &session)?;
        let credential_id = record.id.clone();

        let mut credentials = user.credentials();
        credentials.retain(|existing| existing.id != record.id);
        credentials.push(record);
        let credential_count = credentials.len();

        let blob = encode_credential_blob(&credentials)
            .map_err(|e| CeremonyError::Storage(format!("failed to encode credentials: {}", e)))?;
        let mut update = UserUpdate::default().credential_blob(blob);
        if self.ctx.config.purge_consumed_challenges {
            update = update.clear_challenge();
        }
        self.ctx
            .store
            .update_user(user.id, update)
            .await
            .map_err(|e| CeremonyError::Storage(e.to_string()))?;

        *phase = RegistrationPhase::Committed;
        tracing::info!(
            user_id = %user.id,
            credential_id = %credential_id,
            credential_count,
            phase = ?phase,
            "Registration completed"
        );

        Ok(RegistrationOutcome {
            phase: *phase,
            user_id: user.id,
            username: user.username,
            credential_id,
            credential_count,
        })
    }
}
