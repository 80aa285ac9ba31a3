//! Wire and storage codecs
//!
//! Authenticators and browsers disagree on base64 padding, and credential blobs
//! written by earlier deployments come in several JSON shapes. Everything in this
//! module is tolerant on input and canonical on output.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{Map, Value};

use crate::model::CredentialRecord;

/// Failure to decode a base64url wire field.
#[derive(Debug, thiserror::Error)]
#[error("invalid base64url: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Decode a base64url string with or without padding.
///
/// The unpadded alphabet is tried first, then the padded one.
pub fn decode_flexible_base64(input: &str) -> Result<Vec<u8>, DecodeError> {
    match URL_SAFE_NO_PAD.decode(input) {
        Ok(bytes) => Ok(bytes),
        Err(_) => Ok(URL_SAFE.decode(input)?),
    }
}

/// Encode bytes as unpadded base64url, the canonical form for IDs and challenges.
pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a stored credential blob into its records.
///
/// Accepted shapes, optionally wrapped in a pair of backticks:
/// a JSON array of records, a single record object, or an arbitrary object
/// whose keys can be coerced into a record. Anything else yields an empty
/// list and a warning; the caller is never failed.
pub fn decode_credential_blob(raw: &str) -> Vec<CredentialRecord> {
    let body = strip_backticks(raw.trim()).trim();

    if body.is_empty() || body == "{}" || body == "[]" {
        return Vec::new();
    }

    if let Ok(records) = serde_json::from_str::<Vec<CredentialRecord>>(body) {
        return records;
    }

    if let Ok(record) = serde_json::from_str::<CredentialRecord>(body) {
        return vec![record];
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            if let Some(record) = coerce_legacy_record(map) {
                return vec![record];
            }
        }
        Ok(Value::Array(items)) => {
            let records: Vec<CredentialRecord> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => coerce_legacy_record(map),
                    _ => None,
                })
                .collect();
            if !records.is_empty() {
                return records;
            }
        }
        _ => {}
    }

    tracing::warn!(
        blob_len = raw.len(),
        "Unparseable credential blob, treating as empty"
    );
    tracing::debug!(blob = %raw, "Rejected credential blob");
    Vec::new()
}

/// Serialize records into the canonical (array) blob shape.
pub fn encode_credential_blob(records: &[CredentialRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string(records)
}

/// Whether a stored blob is already in the canonical array shape.
pub fn is_canonical_blob(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || serde_json::from_str::<Vec<CredentialRecord>>(trimmed).is_ok()
}

fn strip_backticks(raw: &str) -> &str {
    raw.strip_prefix('`')
        .and_then(|inner| inner.strip_suffix('`'))
        .unwrap_or(raw)
}

/// Map foreign key spellings onto a [`CredentialRecord`].
///
/// Older writers used Go-style field names (`ID`, `PublicKey`,
/// `Authenticator.SignCount`) and standard base64 for byte fields.
fn coerce_legacy_record(map: Map<String, Value>) -> Option<CredentialRecord> {
    let mut normalized = Map::new();

    for (key, value) in map {
        match normalize_key(&key).as_str() {
            "id" | "credentialid" | "rawid" => {
                if let Some(id) = value.as_str().and_then(normalize_id) {
                    normalized.insert("id".into(), Value::String(id));
                }
            }
            "publickey" | "credentialpublickey" => {
                normalized.insert("publicKey".into(), value);
            }
            "signcount" | "counter" => {
                normalized.insert("signCount".into(), value);
            }
            "transport" | "transports" => {
                normalized.insert("transports".into(), value);
            }
            "attachment" | "authenticatorattachment" => {
                normalized.insert("attachment".into(), value);
            }
            "attestationtype" => {
                normalized.insert("attestationType".into(), value);
            }
            "authenticator" => {
                if let Value::Object(inner) = value {
                    for (inner_key, inner_value) in inner {
                        match normalize_key(&inner_key).as_str() {
                            "signcount" => {
                                normalized.insert("signCount".into(), inner_value);
                            }
                            "attachment" => {
                                normalized.insert("attachment".into(), inner_value);
                            }
                            _ => {}
                        }
                    }
                }
            }
            _ => {}
        }
    }

    serde_json::from_value(Value::Object(normalized)).ok()
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Credential IDs may have been stored as standard base64; re-encode as base64url.
fn normalize_id(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(bytes) = decode_flexible_base64(raw) {
        return Some(encode_base64url(&bytes));
    }
    STANDARD.decode(raw).ok().map(|bytes| encode_base64url(&bytes))
}
