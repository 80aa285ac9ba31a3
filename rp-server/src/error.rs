//! API error handling module
//!
//! Translates ceremony failures into the `{status, errorMessage}` contract
//! with a stable `code` for programmatic handling.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rp_core::CeremonyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Body could not be bound to the expected JSON shape
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ceremony(#[from] CeremonyError),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Ceremony(e) => match e {
                CeremonyError::Validation(_)
                | CeremonyError::Decode { .. }
                | CeremonyError::ChallengeMismatch(_) => StatusCode::BAD_REQUEST,

                // Unknown users are a server-side lookup failure in this contract
                CeremonyError::NotFound(_)
                | CeremonyError::Storage(_)
                | CeremonyError::Verification(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Ceremony(e) => e.code(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Ceremony(CeremonyError::Storage(_)) => "Storage failure".to_string(),
            Self::Ceremony(CeremonyError::Verification(_)) => {
                "Credential verification failed".to_string()
            }
            Self::Ceremony(e) => e.to_string(),
            Self::BadRequest(_) => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Ceremony(_) => "ceremony",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "status": "failed",
            "errorMessage": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CeremonyError::validation("x"), StatusCode::BAD_REQUEST),
            (CeremonyError::decode("clientDataJSON", "bad"), StatusCode::BAD_REQUEST),
            (
                CeremonyError::ChallengeMismatch("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CeremonyError::NotFound("ghost".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                CeremonyError::Storage("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                CeremonyError::verification("x"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_storage_details_are_not_leaked() {
        let err = ApiError::from(CeremonyError::Storage("connection refused at 10.0.0.3".into()));
        assert_eq!(err.client_message(), "Storage failure");
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }
}
