//! Authentication (assertion) ceremony
//!
//! `Started -> AwaitingVerification -> Verified`, or `Failed` from any step.
//! The only write a successful Finish performs is the credential's new
//! signature counter (plus challenge purge when enabled).

use uuid::Uuid;

use super::{
    decode_field, read_client_data, validate_credential, validate_username, CeremonyContext,
};
use crate::codec::{decode_flexible_base64, encode_base64url, encode_credential_blob};
use crate::error::{CeremonyError, Result};
use crate::model::{CeremonyKind, UserUpdate, UserVerification};
use crate::session::SessionOptions;
use crate::verify::{AuthenticationBegin, DecodedAssertion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationPhase {
    Started,
    AwaitingVerification,
    Verified,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct StartAuthentication {
    pub username: String,
    pub user_verification: Option<UserVerification>,
}

#[derive(Debug, Clone)]
pub struct StartAuthenticationOutcome {
    pub user_id: Uuid,
    pub challenge: String,
    /// `publicKeyCredentialRequestOptions`
    pub options: serde_json::Value,
    /// Credential IDs offered to the client (base64url)
    pub allow_credentials: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AssertionResponse {
    pub authenticator_data: String,
    pub client_data_json: String,
    pub signature: String,
    pub user_handle: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FinishAuthentication {
    pub id: String,
    pub raw_id: Option<String>,
    pub response: AssertionResponse,
    pub extension_results: serde_json::Value,
    pub credential_type: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticationOutcome {
    pub phase: AuthenticationPhase,
    pub user_id: Uuid,
    pub username: String,
    pub credential_id: String,
    pub sign_count: u32,
    pub user_verified: bool,
}

#[derive(Debug, Clone)]
pub struct AuthenticationCeremony {
    ctx: CeremonyContext,
}

impl AuthenticationCeremony {
    pub fn new(ctx: CeremonyContext) -> Self {
        Self { ctx }
    }

    /// Issue request options for a known user.
    ///
    /// An unknown username fails before any challenge or session is created.
    pub async fn start(&self, cmd: StartAuthentication) -> Result<StartAuthenticationOutcome> {
        let username = validate_username(&cmd.username)?;
        let user = self.ctx.store.get_user_by_username(username).await?;
        let credentials = user.credentials();
        let user_verification = cmd.user_verification.unwrap_or_default();

        let issued = self.ctx.verifier.issue_authentication(AuthenticationBegin {
            user_id: user.id,
            credentials: &credentials,
            user_verification,
        })?;
        let challenge = issued.challenge.encoded();

        self.ctx
            .store
            .update_user(user.id, UserUpdate::challenge(challenge.clone()))
            .await
            .map_err(|e| CeremonyError::Storage(e.to_string()))?;

        self.ctx.sessions.begin_session(
            CeremonyKind::Authentication,
            SessionOptions {
                challenge: issued.challenge,
                rp_id: self.ctx.verifier.rp_id().to_string(),
                user_id: user.id,
                user_verification,
                engine_state: issued.state,
            },
        );

        tracing::info!(
            user_id = %user.id,
            credentials = credentials.len(),
            phase = ?AuthenticationPhase::Started,
            "Authentication started"
        );

        Ok(StartAuthenticationOutcome {
            user_id: user.id,
            challenge,
            options: issued.options,
            allow_credentials: credentials.into_iter().map(|c| c.id).collect(),
        })
    }

    /// Verify an assertion against the credential it names.
    pub async fn finish(&self, cmd: FinishAuthentication) -> Result<AuthenticationOutcome> {
        let mut phase = AuthenticationPhase::Started;
        match self.finish_inner(cmd, &mut phase).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(
                    reached = ?phase,
                    phase = ?AuthenticationPhase::Failed,
                    error = %err,
                    "Authentication failed"
                );
                Err(err)
            }
        }
    }

    async fn finish_inner(
        &self,
        cmd: FinishAuthentication,
        phase: &mut AuthenticationPhase,
    ) -> Result<AuthenticationOutcome> {
        validate_credential(&cmd.id, &cmd.credential_type)?;

        let (client_data_json, challenge) = read_client_data(&cmd.response.client_data_json)?;
        let session = self
            .ctx
            .sessions
            .take_session(CeremonyKind::Authentication, &challenge)?;
        *phase = AuthenticationPhase::AwaitingVerification;

        let authenticator_data =
            decode_field("authenticatorData", &cmd.response.authenticator_data)?;
        let signature = decode_field("signature", &cmd.response.signature)?;
        let user_handle = cmd
            .response
            .user_handle
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|h| decode_field("userHandle", h))
            .transpose()?;
        let raw_id = decode_field("id", cmd.raw_id.as_deref().unwrap_or(&cmd.id))?;
        let credential_id = encode_base64url(&raw_id);

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
        if let Some(handle) = &user_handle {
            if handle.as_slice() != user.id.as_bytes() {
                return Err(CeremonyError::verification(
                    "user handle does not match the challenged user",
                ));
            }
        }

        let mut credentials = user.credentials();
        let Some(index) = credentials
            .iter()
            .position(|c| same_credential(&c.id, &raw_id))
        else {
            return Err(self.foreign_credential(&user.id, &credential_id, &raw_id).await);
        };

        let response = DecodedAssertion {
            credential_id: credential_id.clone(),
            raw_id,
            credential_type: cmd.credential_type,
            client_data_json,
            authenticator_data,
            signature,
            user_handle,
            extension_results: cmd.extension_results,
        };
        let verdict = self
            .ctx
            .verifier
            .verify_assertion(&response, &session, &credentials[index])?;

        let stored = &mut credentials[index];
        if !counter_advanced(stored.sign_count, verdict.sign_count) {
            tracing::warn!(
                user_id = %user.id,
                credential_id = %credential_id,
                stored = stored.sign_count,
                presented = verdict.sign_count,
                "Signature counter did not advance, possible cloned authenticator"
            );
            return Err(CeremonyError::verification(format!(
                "signature counter regressed ({} <= {})",
                verdict.sign_count, stored.sign_count
            )));
        }

        let mut changed = stored.sign_count != verdict.sign_count;
        stored.sign_count = verdict.sign_count;
        if let Some(public_key) = verdict.updated_public_key {
            changed |= stored.public_key != public_key;
            stored.public_key = public_key;
        }

        let mut update = UserUpdate::default();
        if changed {
            let blob = encode_credential_blob(&credentials).map_err(|e| {
                CeremonyError::Storage(format!("failed to encode credentials: {}", e))
            })?;
            update = update.credential_blob(blob);
        }
        if self.ctx.config.purge_consumed_challenges {
            update = update.clear_challenge();
        }
        if !update.is_empty() {
            self.ctx
                .store
                .update_user(user.id, update)
                .await
                .map_err(|e| CeremonyError::Storage(e.to_string()))?;
        }

        *phase = AuthenticationPhase::Verified;
        tracing::info!(
            user_id = %user.id,
            credential_id = %credential_id,
            sign_count = verdict.sign_count,
            user_verified = verdict.user_verified,
            phase = ?phase,
            "Authentication completed"
        );

        Ok(AuthenticationOutcome {
            phase: *phase,
            user_id: user.id,
            username: user.username,
            credential_id,
            sign_count: verdict.sign_count,
            user_verified: verdict.user_verified,
        })
    }

    /// Build the error for a credential absent from the challenged user's blob.
    async fn foreign_credential(
        &self,
        user_id: &Uuid,
        credential_id: &str,
        raw_id: &[u8],
    ) -> CeremonyError {
        let owner = match self.ctx.store.all_credentials().await {
            Ok(all) => all
                .into_iter()
                .find(|(_, record)| same_credential(&record.id, raw_id))
                .map(|(owner, _)| owner),
            Err(e) => return CeremonyError::Storage(e.to_string()),
        };

        match owner {
            Some(owner) => {
                tracing::warn!(
                    user_id = %user_id,
                    owner = %owner,
                    credential_id = %credential_id,
                    "Assertion presented a credential owned by another user"
                );
                CeremonyError::verification("credential is not registered to this user")
            }
            None => CeremonyError::verification(format!("unknown credential: {}", credential_id)),
        }
    }
}

/// Stored IDs are compared as bytes so legacy padded forms still match.
fn same_credential(stored_id: &str, raw_id: &[u8]) -> bool {
    decode_flexible_base64(stored_id).is_ok_and(|bytes| bytes == raw_id)
}

/// Authenticators without a counter report 0 forever; anything else must increase.
fn counter_advanced(stored: u32, presented: u32) -> bool {
    (stored == 0 && presented == 0) || presented > stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceremony::{CeremonyConfig, StartRegistration};
    use crate::store::CredentialStore;
    use crate::testing::{assertion_for, attestation_for, harness, harness_with, Harness};

    async fn enrol(h: &Harness, username: &str, credential: &[u8]) {
        let started = h
            .registration
            .start(StartRegistration {
                username: username.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        h.registration
            .finish(attestation_for(&started.challenge, credential))
            .await
            .unwrap();
    }

    fn start(username: &str) -> StartAuthentication {
        StartAuthentication {
            username: username.into(),
            user_verification: None,
        }
    }

    #[test]
    fn test_counter_advanced() {
        assert!(counter_advanced(0, 0));
        assert!(counter_advanced(0, 1));
        assert!(counter_advanced(5, 6));
        assert!(!counter_advanced(5, 5));
        assert!(!counter_advanced(5, 3));
        assert!(!counter_advanced(5, 0));
    }

    #[tokio::test]
    async fn test_login_after_registration() {
        let h = harness();
        enrol(&h, "alice", b"cred-1").await;

        let started = h.authentication.start(start("alice")).await.unwrap();
        assert_eq!(started.allow_credentials, vec![encode_base64url(b"cred-1")]);

        h.engine.set_next_counter(1);
        let outcome = h
            .authentication
            .finish(assertion_for(&started.challenge, b"cred-1"))
            .await
            .unwrap();
        assert_eq!(outcome.phase, AuthenticationPhase::Verified);
        assert_eq!(outcome.sign_count, 1);

        let alice = h.store.get_user_by_username("alice").await.unwrap();
        assert_eq!(alice.credentials()[0].sign_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_user_creates_no_session() {
        let h = harness();
        let err = h.authentication.start(start("ghost")).await.unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound(_)));
        assert_eq!(h.sessions.pending(CeremonyKind::Authentication), 0);
    }

    #[tokio::test]
    async fn test_bad_client_data_fails_before_store_lookup() {
        let h = harness();
        enrol(&h, "alice", b"cred-1").await;
        h.authentication.start(start("alice")).await.unwrap();

        let mut cmd = assertion_for("AAAA", b"cred-1");
        cmd.response.client_data_json = "!!not base64!!".into();
        let err = h.authentication.finish(cmd).await.unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::Decode {
                field: "clientDataJSON",
                ..
            }
        ));
        // Session remains available for a well-formed retry
        assert_eq!(h.sessions.pending(CeremonyKind::Authentication), 1);
    }

    #[tokio::test]
    async fn test_counter_regression_is_rejected_without_write() {
        let h = harness();
        enrol(&h, "alice", b"cred-1").await;

        let first = h.authentication.start(start("alice")).await.unwrap();
        h.engine.set_next_counter(7);
        h.authentication
            .finish(assertion_for(&first.challenge, b"cred-1"))
            .await
            .unwrap();

        let second = h.authentication.start(start("alice")).await.unwrap();
        h.engine.set_next_counter(3);
        let err = h
            .authentication
            .finish(assertion_for(&second.challenge, b"cred-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Verification(_)));

        let alice = h.store.get_user_by_username("alice").await.unwrap();
        assert_eq!(alice.credentials()[0].sign_count, 7);
    }

    #[tokio::test]
    async fn test_credential_of_another_user_is_rejected() {
        let h = harness();
        enrol(&h, "alice", b"cred-a").await;
        enrol(&h, "bob", b"cred-b").await;

        let started = h.authentication.start(start("alice")).await.unwrap();
        let err = h
            .authentication
            .finish(assertion_for(&started.challenge, b"cred-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Verification(_)));
    }

    #[tokio::test]
    async fn test_user_without_credentials_is_not_found() {
        let h = harness();
        h.registration
            .start(StartRegistration {
                username: "carol".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = h.authentication.start(start("carol")).await.unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_single_slot_supersedes_first_login() {
        let h = crate::testing::harness_scoped(
            crate::session::SessionScope::SingleSlot,
            CeremonyConfig::default(),
        );
        enrol(&h, "alice", b"cred-a").await;
        enrol(&h, "bob", b"cred-b").await;

        let first = h.authentication.start(start("alice")).await.unwrap();
        let second = h.authentication.start(start("bob")).await.unwrap();

        let err = h
            .authentication
            .finish(assertion_for(&first.challenge, b"cred-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ChallengeMismatch(_)));

        h.authentication
            .finish(assertion_for(&second.challenge, b"cred-b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_challenge_retained_without_purge() {
        let h = harness_with(CeremonyConfig {
            purge_consumed_challenges: false,
        });
        enrol(&h, "alice", b"cred-1").await;

        let started = h.authentication.start(start("alice")).await.unwrap();
        h.authentication
            .finish(assertion_for(&started.challenge, b"cred-1"))
            .await
            .unwrap();

        let alice = h.store.get_user_by_username("alice").await.unwrap();
        assert_eq!(alice.challenge.as_deref(), Some(started.challenge.as_str()));

        // The session is gone even though the row still carries the challenge
        let err = h
            .authentication
            .finish(assertion_for(&started.challenge, b"cred-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ChallengeMismatch(_)));
    }
}
