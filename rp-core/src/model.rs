//! Domain types shared by the store, sessions and ceremonies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::decode_credential_blob;

/// Identity anchor owning zero or more credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    /// Challenge of the ceremony most recently started for this user (base64url)
    pub challenge: Option<String>,
    /// Serialized credential records, see [`crate::codec::decode_credential_blob`]
    pub credential_blob: String,
}

impl User {
    /// Decode this user's credential records, tolerating legacy shapes.
    pub fn credentials(&self) -> Vec<CredentialRecord> {
        decode_credential_blob(&self.credential_blob)
    }
}

/// Input for creating a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub challenge: Option<String>,
    pub credential_blob: String,
}

/// Partial update; only `Some` fields change.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub display_name: Option<String>,
    /// `Some(None)` clears the challenge
    pub challenge: Option<Option<String>>,
    pub credential_blob: Option<String>,
}

impl UserUpdate {
    pub fn challenge(challenge: impl Into<String>) -> Self {
        Self {
            challenge: Some(Some(challenge.into())),
            ..Self::default()
        }
    }

    pub fn clear_challenge(mut self) -> Self {
        self.challenge = Some(None);
        self
    }

    pub fn credential_blob(mut self, blob: String) -> Self {
        self.credential_blob = Some(blob);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.challenge.is_none() && self.credential_blob.is_none()
    }

    /// Merge this update into `user` in place.
    pub fn apply_to(self, user: &mut User) {
        if let Some(display_name) = self.display_name {
            user.display_name = display_name;
        }
        if let Some(challenge) = self.challenge {
            user.challenge = challenge;
        }
        if let Some(blob) = self.credential_blob {
            user.credential_blob = blob;
        }
    }
}

/// One registered authenticator, embedded in a user's credential blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Credential ID (base64url, unpadded)
    pub id: String,
    /// Public key material in the verification engine's own encoding
    #[serde(default)]
    pub public_key: serde_json::Value,
    #[serde(default)]
    pub sign_count: u32,
    #[serde(default, deserialize_with = "transports_or_default")]
    pub transports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Legacy writers stored `null` for an empty transport list.
fn transports_or_default<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// The two ceremony kinds; each has its own session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

impl std::fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebAuthn user-verification requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

/// WebAuthn attestation conveyance preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

/// Authenticator selection criteria requested by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_resident_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_verification: Option<UserVerification>,
}
