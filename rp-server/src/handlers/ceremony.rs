//! Ceremony endpoints
//!
//! Thin JSON bindings over the registration and authentication ceremonies:
//!
//! - `POST /attestation/options` starts registration
//! - `POST /attestation/result` finishes registration
//! - `POST /assertion/options` starts authentication
//! - `POST /assertion/result` finishes authentication

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use rp_core::{
    AssertionResponse, AttestationConveyance, AttestationResponse, AuthenticatorSelection,
    FinishAuthentication, FinishRegistration, StartAuthentication, StartRegistration,
    UserVerification,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;

/// Request to start registration
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttestationOptionsRequest {
    #[schema(example = "alice")]
    pub username: String,
    /// Defaults to the username when empty
    #[serde(default)]
    #[schema(example = "Alice Liddell")]
    pub display_name: String,
    /// `authenticatorAttachment`, `residentKey`, `requireResidentKey`, `userVerification`
    #[serde(default)]
    #[schema(value_type = Object)]
    pub authenticator_selection: AuthenticatorSelection,
    /// "none", "indirect", "direct" or "enterprise"
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "none")]
    pub attestation: Option<AttestationConveyance>,
}

impl From<AttestationOptionsRequest> for StartRegistration {
    fn from(req: AttestationOptionsRequest) -> Self {
        Self {
            username: req.username,
            display_name: req.display_name,
            authenticator_selection: req.authenticator_selection,
            attestation: req.attestation.unwrap_or_default(),
        }
    }
}

/// Registration options handed to `navigator.credentials.create`
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttestationOptionsResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
    pub error_message: &'static str,
    #[schema(value_type = Object)]
    pub public_key_credential_creation_options: serde_json::Value,
}

/// Authenticator response to `navigator.credentials.create`
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    /// base64url CBOR attestation object
    pub attestation_object: String,
    /// base64url client data
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
}

/// Request to finish registration
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResultRequest {
    /// Credential ID (base64url)
    pub id: String,
    #[serde(default)]
    pub raw_id: Option<String>,
    pub response: AttestationPayload,
    #[serde(default, alias = "clientExtensionResults")]
    #[schema(value_type = Object)]
    pub extension_results: serde_json::Value,
    /// Always "public-key"
    #[serde(default, rename = "type")]
    #[schema(example = "public-key")]
    pub credential_type: String,
}

impl From<AttestationResultRequest> for FinishRegistration {
    fn from(req: AttestationResultRequest) -> Self {
        Self {
            id: req.id,
            raw_id: req.raw_id,
            response: AttestationResponse {
                attestation_object: req.response.attestation_object,
                client_data_json: req.response.client_data_json,
            },
            extension_results: req.extension_results,
            credential_type: req.credential_type,
        }
    }
}

/// Request to start authentication
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptionsRequest {
    #[schema(example = "alice")]
    pub username: String,
    /// "required", "preferred" or "discouraged"
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "preferred")]
    pub user_verification: Option<UserVerification>,
}

impl From<AssertionOptionsRequest> for StartAuthentication {
    fn from(req: AssertionOptionsRequest) -> Self {
        Self {
            username: req.username,
            user_verification: req.user_verification,
        }
    }
}

/// Request options handed to `navigator.credentials.get`
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptionsResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
    pub error_message: &'static str,
    #[schema(value_type = Object)]
    pub public_key_credential_request_options: serde_json::Value,
}

/// Authenticator response to `navigator.credentials.get`
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssertionPayload {
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    #[serde(default)]
    pub user_handle: Option<String>,
}

/// Request to finish authentication
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResultRequest {
    pub id: String,
    #[serde(default)]
    pub raw_id: Option<String>,
    pub response: AssertionPayload,
    #[serde(default, alias = "clientExtensionResults")]
    #[schema(value_type = Object)]
    pub extension_results: serde_json::Value,
    #[serde(default, rename = "type")]
    #[schema(example = "public-key")]
    pub credential_type: String,
}

impl From<AssertionResultRequest> for FinishAuthentication {
    fn from(req: AssertionResultRequest) -> Self {
        Self {
            id: req.id,
            raw_id: req.raw_id,
            response: AssertionResponse {
                authenticator_data: req.response.authenticator_data,
                client_data_json: req.response.client_data_json,
                signature: req.response.signature,
                user_handle: req.response.user_handle,
            },
            extension_results: req.extension_results,
            credential_type: req.credential_type,
        }
    }
}

/// Outcome of a Finish step
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
    pub error_message: &'static str,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            status: "ok",
            error_message: "",
        }
    }
}

/// POST /attestation/options
///
/// Start registration for a new or existing username.
#[utoipa::path(
    post,
    path = "/attestation/options",
    tag = "Registration",
    request_body = AttestationOptionsRequest,
    responses(
        (status = 200, description = "Creation options issued", body = AttestationOptionsResponse),
        (status = 400, description = "Malformed request"),
        (status = 500, description = "Storage or engine failure")
    )
)]
pub async fn attestation_options(
    State(state): State<AppState>,
    payload: Result<Json<AttestationOptionsRequest>, JsonRejection>,
) -> Result<Json<AttestationOptionsResponse>, ApiError> {
    let Json(req) = payload?;
    let started = state.registration.start(req.into()).await?;

    Ok(Json(AttestationOptionsResponse {
        status: "ok",
        error_message: "",
        public_key_credential_creation_options: started.options,
    }))
}

/// POST /attestation/result
///
/// Verify the authenticator's attestation and store the new credential.
#[utoipa::path(
    post,
    path = "/attestation/result",
    tag = "Registration",
    request_body = AttestationResultRequest,
    responses(
        (status = 200, description = "Credential registered", body = StatusResponse),
        (status = 400, description = "Malformed request, undecodable field or challenge mismatch"),
        (status = 500, description = "Unknown user, storage failure or verification rejected")
    )
)]
pub async fn attestation_result(
    State(state): State<AppState>,
    payload: Result<Json<AttestationResultRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = payload?;
    state.registration.finish(req.into()).await?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /assertion/options
///
/// Start authentication for a registered username.
#[utoipa::path(
    post,
    path = "/assertion/options",
    tag = "Authentication",
    request_body = AssertionOptionsRequest,
    responses(
        (status = 200, description = "Request options issued", body = AssertionOptionsResponse),
        (status = 400, description = "Malformed request"),
        (status = 500, description = "Unknown user or storage failure")
    )
)]
pub async fn assertion_options(
    State(state): State<AppState>,
    payload: Result<Json<AssertionOptionsRequest>, JsonRejection>,
) -> Result<Json<AssertionOptionsResponse>, ApiError> {
    let Json(req) = payload?;
    let started = state.authentication.start(req.into()).await?;

    Ok(Json(AssertionOptionsResponse {
        status: "ok",
        error_message: "",
        public_key_credential_request_options: started.options,
    }))
}

/// POST /assertion/result
///
/// Verify the authenticator's assertion.
#[utoipa::path(
    post,
    path = "/assertion/result",
    tag = "Authentication",
    request_body = AssertionResultRequest,
    responses(
        (status = 200, description = "Assertion verified", body = StatusResponse),
        (status = 400, description = "Malformed request, undecodable field or challenge mismatch"),
        (status = 500, description = "Unknown user, storage failure or verification rejected")
    )
)]
pub async fn assertion_result(
    State(state): State<AppState>,
    payload: Result<Json<AssertionResultRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = payload?;
    state.authentication.finish(req.into()).await?;
    Ok(Json(StatusResponse::ok()))
}
