//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod ceremony;
pub mod health;

pub use crate::state::AppState;
pub use ceremony::{
    assertion_options, assertion_result, attestation_options, attestation_result,
    AssertionOptionsRequest, AssertionOptionsResponse, AssertionPayload, AssertionResultRequest,
    AttestationOptionsRequest, AttestationOptionsResponse, AttestationPayload,
    AttestationResultRequest, StatusResponse,
};
pub use health::{health, ready, HealthResponse, ReadyResponse};
