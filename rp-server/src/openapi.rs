//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document for the relying-party API.

use utoipa::OpenApi;

use crate::handlers::{
    AssertionOptionsRequest, AssertionOptionsResponse, AssertionPayload, AssertionResultRequest,
    AttestationOptionsRequest, AttestationOptionsResponse, AttestationPayload,
    AttestationResultRequest, HealthResponse, ReadyResponse, StatusResponse,
};

/// Relying Party API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "WebAuthn Relying Party API",
        version = "0.1.0",
        description = r#"
## Passwordless registration and login

Each ceremony is two calls:

1. **Options** issues a challenge and the options for `navigator.credentials.create` / `get`
2. **Result** submits the authenticator's response for verification

All failures answer `{"status":"failed","errorMessage":"...","code":"..."}`.
Malformed input, undecodable fields and challenge mismatches are `400`;
unknown users, storage failures and rejected credentials are `500`.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers((url = "http://localhost:8080", description = "Local development server")),
    tags(
        (name = "Registration", description = "Attestation ceremony: enrol a new authenticator"),
        (name = "Authentication", description = "Assertion ceremony: log in with a registered authenticator"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::ceremony::attestation_options,
        crate::handlers::ceremony::attestation_result,
        crate::handlers::ceremony::assertion_options,
        crate::handlers::ceremony::assertion_result,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            StatusResponse,
            AttestationOptionsRequest,
            AttestationOptionsResponse,
            AttestationPayload,
            AttestationResultRequest,
            AssertionOptionsRequest,
            AssertionOptionsResponse,
            AssertionPayload,
            AssertionResultRequest,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_ceremony_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/attestation/options",
            "/attestation/result",
            "/assertion/options",
            "/assertion/result",
            "/health",
            "/ready",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
