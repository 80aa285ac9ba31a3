//! Ceremony error taxonomy

use thiserror::Error;

use crate::codec::DecodeError;
use crate::session::SessionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CeremonyError {
    /// Malformed or missing request fields
    #[error("validation error: {0}")]
    Validation(String),

    /// A wire field failed base64 or JSON decoding
    #[error("failed to decode {field}: {reason}")]
    Decode { field: &'static str, reason: String },

    #[error("challenge mismatch: {0}")]
    ChallengeMismatch(String),

    /// Unknown user or challenge
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The verification engine rejected the response
    #[error("verification failed: {0}")]
    Verification(String),
}

impl CeremonyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            field,
            reason: reason.to_string(),
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification(message.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_INPUT",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::ChallengeMismatch(_) => "CHALLENGE_MISMATCH",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Verification(_) => "VERIFICATION_FAILED",
        }
    }

    /// Whether the failure was caused by the client's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Decode { .. } | Self::ChallengeMismatch(_)
        )
    }

    pub(crate) fn decode_field(field: &'static str) -> impl FnOnce(DecodeError) -> Self {
        move |e| Self::decode(field, e)
    }
}

impl From<StoreError> for CeremonyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<SessionError> for CeremonyError {
    fn from(err: SessionError) -> Self {
        Self::ChallengeMismatch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CeremonyKind;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: CeremonyError = StoreError::NotFound("ghost".into()).into();
        assert!(matches!(err, CeremonyError::NotFound(_)));
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_store_failures_map_to_storage() {
        let err: CeremonyError = StoreError::Duplicate("alice".into()).into();
        assert!(matches!(err, CeremonyError::Storage(_)));
    }

    #[test]
    fn test_every_session_error_is_a_mismatch() {
        for err in [
            SessionError::NotStarted(CeremonyKind::Registration),
            SessionError::Mismatch(CeremonyKind::Registration),
            SessionError::Expired(CeremonyKind::Authentication),
        ] {
            let mapped: CeremonyError = err.into();
            assert!(mapped.is_client_error());
            assert_eq!(mapped.code(), "CHALLENGE_MISMATCH");
        }
    }
}
