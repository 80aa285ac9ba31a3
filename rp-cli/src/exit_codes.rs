//! Exit codes following sysexits.h conventions.
//!
//! Scripts driving `rp-admin` can tell a missing user apart from an
//! unreachable database.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (missing database URL, bad identifier).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Stored data could not be rewritten (blob re-encoding failed).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Requested user does not exist.
/// Maps to EX_NOUSER from sysexits.h.
pub const NO_USER: i32 = 67;

/// Database unreachable.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let code = if message.contains("No database URL") || message.contains("Invalid user id") {
            USAGE_ERROR
        } else if message.contains("user not found") {
            NO_USER
        } else if message.contains("Failed to connect") {
            UNAVAILABLE
        } else if message.contains("Failed to encode") {
            DATA_ERROR
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}
