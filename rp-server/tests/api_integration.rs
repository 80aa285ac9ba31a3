//! API integration tests for rp-server.
//!
//! These tests drive the full router over the in-memory store with a stub
//! verification engine, exercising both ceremonies through the HTTP contract.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use rp_core::codec::encode_base64url;
use rp_core::testing::{client_data, StubEngine};
use rp_server::{create_router_with_config, AppState, Config};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Build the test router over a fresh in-memory store
fn create_test_app() -> Router {
    create_test_app_with(Config::default())
}

fn create_test_app_with(config: Config) -> Router {
    let state = AppState::in_memory(&config, Arc::new(StubEngine::new()));
    create_router_with_config(&config, state)
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    (status, read_json(response).await)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    (status, read_json(response).await)
}

fn attestation_body(challenge: &str, credential_id: &[u8]) -> Value {
    let id = encode_base64url(credential_id);
    json!({
        "id": id,
        "rawId": id,
        "type": "public-key",
        "response": {
            "attestationObject": encode_base64url(b"stub-attestation"),
            "clientDataJSON": client_data("webauthn.create", challenge),
        },
        "extensionResults": {},
    })
}

fn assertion_body(challenge: &str, credential_id: &[u8]) -> Value {
    let id = encode_base64url(credential_id);
    json!({
        "id": id,
        "rawId": id,
        "type": "public-key",
        "response": {
            "authenticatorData": encode_base64url(b"stub-authenticator-data"),
            "clientDataJSON": client_data("webauthn.get", challenge),
            "signature": encode_base64url(b"stub-signature"),
            "userHandle": null,
        },
        "extensionResults": {},
    })
}

/// Start registration and return the issued challenge
async fn start_registration(app: &Router, username: &str) -> String {
    let (status, json) = post_json(
        app,
        "/attestation/options",
        json!({ "username": username, "displayName": username }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    json["publicKeyCredentialCreationOptions"]["challenge"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn register(app: &Router, username: &str, credential_id: &[u8]) {
    let challenge = start_registration(app, username).await;
    let (status, json) = post_json(
        app,
        "/attestation/result",
        attestation_body(&challenge, credential_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = create_test_app();
    let (status, json) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store"], "memory");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let app = create_test_app();
    let (status, json) = get(&app, "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = create_test_app();
    let (status, json) = get(&app, "/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/attestation/options"].is_object());
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_registration_options_shape() {
    let app = create_test_app();
    let (status, json) = post_json(
        &app,
        "/attestation/options",
        json!({
            "username": "alice",
            "displayName": "Alice",
            "authenticatorSelection": { "authenticatorAttachment": "platform" },
            "attestation": "none",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["errorMessage"], "");
    let options = &json["publicKeyCredentialCreationOptions"];
    assert!(options["challenge"].is_string());
    assert_eq!(options["user"]["name"], "alice");
}

#[tokio::test]
async fn test_registration_then_replay_is_challenge_mismatch() {
    let app = create_test_app();
    let challenge = start_registration(&app, "alice").await;

    let (status, json) = post_json(
        &app,
        "/attestation/result",
        attestation_body(&challenge, b"cred-1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "status": "ok", "errorMessage": "" }));

    let (status, json) = post_json(
        &app,
        "/attestation/result",
        attestation_body(&challenge, b"cred-1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "failed");
    assert_eq!(json["code"], "CHALLENGE_MISMATCH");
    assert!(json["errorMessage"].is_string());
}

#[tokio::test]
async fn test_registration_missing_username_is_validation_error() {
    let app = create_test_app();
    let (status, json) = post_json(&app, "/attestation/options", json!({ "username": "" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_unbindable_body_is_validation_error() {
    let app = create_test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/attestation/result")
                .header("content-type", "application/json")
                .body(Body::from("{\"id\": 42"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["status"], "failed");
    assert_eq!(json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_taken_username_is_storage_error_without_options() {
    let app = create_test_app();
    register(&app, "alice", b"alice-key").await;

    let (status, json) = post_json(
        &app,
        "/attestation/options",
        json!({ "username": "alice", "displayName": "Mallory" }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "STORAGE_ERROR");
    assert!(json.get("publicKeyCredentialCreationOptions").is_none());

    let (_, health) = get(&app, "/health").await;
    assert_eq!(health["pending_registrations"], 0);
}

#[tokio::test]
async fn test_new_user_options_exclude_other_users_credentials() {
    let app = create_test_app();
    register(&app, "alice", b"alice-key").await;

    let (status, json) = post_json(
        &app,
        "/attestation/options",
        json!({ "username": "bob", "displayName": "Bob" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["publicKeyCredentialCreationOptions"]["excludeCredentials"],
        json!([])
    );
}

// ============================================================================
// Authentication Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_user_is_not_found_500() {
    let app = create_test_app();
    let (status, json) = post_json(
        &app,
        "/assertion/options",
        json!({ "username": "ghost", "userVerification": "preferred" }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "failed");
    assert_eq!(json["code"], "NOT_FOUND");

    let (_, health) = get(&app, "/health").await;
    assert_eq!(health["pending_authentications"], 0);
}

#[tokio::test]
async fn test_undecodable_client_data_is_decode_error() {
    let app = create_test_app();
    let mut body = assertion_body("AAAA", b"cred-1");
    body["response"]["clientDataJSON"] = json!("!!not base64!!");

    let (status, json) = post_json(&app, "/assertion/result", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "DECODE_ERROR");
}

#[tokio::test]
async fn test_login_after_registration() {
    let app = create_test_app();
    register(&app, "alice", b"cred-1").await;

    let (status, json) = post_json(
        &app,
        "/assertion/options",
        json!({ "username": "alice", "userVerification": "required" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let options = &json["publicKeyCredentialRequestOptions"];
    assert_eq!(options["allowCredentials"][0]["id"], encode_base64url(b"cred-1"));
    let challenge = options["challenge"].as_str().unwrap().to_string();

    let (status, json) =
        post_json(&app, "/assertion/result", assertion_body(&challenge, b"cred-1")).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_assertion_with_foreign_credential_is_rejected() {
    let app = create_test_app();
    register(&app, "alice", b"cred-a").await;
    register(&app, "bob", b"cred-b").await;

    let (_, json) = post_json(&app, "/assertion/options", json!({ "username": "alice" })).await;
    let challenge = json["publicKeyCredentialRequestOptions"]["challenge"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, json) =
        post_json(&app, "/assertion/result", assertion_body(&challenge, b"cred-b")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "VERIFICATION_FAILED");
}

#[tokio::test]
async fn test_single_slot_scope_replaces_pending_ceremony() {
    let app = create_test_app_with(Config {
        session_scope: rp_core::SessionScope::SingleSlot,
        ..Config::default()
    });

    let first = start_registration(&app, "alice").await;
    let second = start_registration(&app, "bob").await;

    let (status, json) =
        post_json(&app, "/attestation/result", attestation_body(&first, b"cred-a")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "CHALLENGE_MISMATCH");

    let (status, _) =
        post_json(&app, "/attestation/result", attestation_body(&second, b"cred-b")).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Rate Limiting Tests
// ============================================================================

fn health_from(addr: SocketAddr) -> Request<Body> {
    let mut request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn test_rate_limit_rejects_burst_overflow() {
    let app = create_test_app_with(Config {
        rate_limit_enabled: true,
        rate_limit_per_minute: 1,
        rate_limit_burst: 1,
        ..Config::default()
    });
    let client = SocketAddr::from(([203, 0, 113, 7], 40000));

    let first = app.clone().oneshot(health_from(client)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(health_from(client)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    // Quotas are per client address
    let other = SocketAddr::from(([203, 0, 113, 8], 40000));
    let third = app.oneshot(health_from(other)).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}
