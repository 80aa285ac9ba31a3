//! Challenge/session manager
//!
//! Tracks in-flight ceremony sessions in process memory. Registration and
//! authentication sessions live in independent tables. Two scopes exist:
//!
//! - [`SessionScope::Keyed`]: one entry per issued challenge, so concurrent
//!   ceremonies of the same kind do not interfere.
//! - [`SessionScope::SingleSlot`]: one pending session per kind; starting a new
//!   ceremony silently replaces the previous one.
//!
//! Sessions expire after the configured TTL and are consumed once a Finish step
//! presents their challenge.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::codec::{decode_flexible_base64, encode_base64url, DecodeError};
use crate::model::{CeremonyKind, UserVerification};

/// Default session lifetime (5 minutes)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Lifetime used when the configured TTL does not fit the monotonic clock
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Raw challenge bytes. Compared byte-for-byte, never by transport encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Challenge(Vec<u8>);

impl Challenge {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a base64url challenge, padded or not.
    pub fn from_encoded(encoded: &str) -> Result<Self, DecodeError> {
        decode_flexible_base64(encoded).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical unpadded base64url form, as stored on the user row.
    pub fn encoded(&self) -> String {
        encode_base64url(&self.0)
    }
}

impl std::fmt::Display for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded())
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Challenge({})", self.encoded())
    }
}

/// How sessions of one kind are retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionScope {
    #[default]
    Keyed,
    SingleSlot,
}

impl std::str::FromStr for SessionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyed" | "per-challenge" => Ok(Self::Keyed),
            "single-slot" | "single_slot" | "slot" => Ok(Self::SingleSlot),
            other => Err(format!("unknown session scope: {}", other)),
        }
    }
}

/// Parameters recorded when a ceremony starts.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub challenge: Challenge,
    pub rp_id: String,
    pub user_id: Uuid,
    pub user_verification: UserVerification,
    /// Opaque verification-engine state needed at Finish
    pub engine_state: serde_json::Value,
}

/// An in-flight ceremony.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub kind: CeremonyKind,
    pub challenge: Challenge,
    pub rp_id: String,
    pub user_id: Uuid,
    pub user_verification: UserVerification,
    pub engine_state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no {0} ceremony in progress")]
    NotStarted(CeremonyKind),

    #[error("challenge does not match any pending {0} ceremony")]
    Mismatch(CeremonyKind),

    #[error("{0} challenge expired")]
    Expired(CeremonyKind),
}

struct SessionEntry {
    session: Session,
    expires_at: Instant,
}

impl SessionEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

enum SessionTable {
    Keyed(DashMap<Challenge, SessionEntry>),
    Single(Mutex<Option<SessionEntry>>),
}

impl SessionTable {
    fn new(scope: SessionScope) -> Self {
        match scope {
            SessionScope::Keyed => Self::Keyed(DashMap::new()),
            SessionScope::SingleSlot => Self::Single(Mutex::new(None)),
        }
    }
}

pub struct SessionManager {
    scope: SessionScope,
    ttl: Duration,
    registration: SessionTable,
    authentication: SessionTable,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionScope::default(), DEFAULT_SESSION_TTL)
    }
}

impl SessionManager {
    pub fn new(scope: SessionScope, ttl: Duration) -> Self {
        Self {
            scope,
            ttl,
            registration: SessionTable::new(scope),
            authentication: SessionTable::new(scope),
        }
    }

    pub fn scope(&self) -> SessionScope {
        self.scope
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn table(&self, kind: CeremonyKind) -> &SessionTable {
        match kind {
            CeremonyKind::Registration => &self.registration,
            CeremonyKind::Authentication => &self.authentication,
        }
    }

    /// Record a new session for `kind` and return it with its challenge.
    pub fn begin_session(&self, kind: CeremonyKind, options: SessionOptions) -> (Challenge, Session) {
        let session = Session {
            kind,
            challenge: options.challenge,
            rp_id: options.rp_id,
            user_id: options.user_id,
            user_verification: options.user_verification,
            engine_state: options.engine_state,
            created_at: Utc::now(),
        };
        let now = Instant::now();
        let expires_at = now
            .checked_add(self.ttl)
            .unwrap_or_else(|| now + MAX_SESSION_TTL);
        let entry = SessionEntry {
            session: session.clone(),
            expires_at,
        };

        match self.table(kind) {
            SessionTable::Keyed(map) => {
                map.insert(session.challenge.clone(), entry);
            }
            SessionTable::Single(slot) => {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(previous) = slot.replace(entry) {
                    if previous.is_live(Instant::now()) {
                        tracing::warn!(
                            kind = %kind,
                            superseded_user = %previous.session.user_id,
                            "Pending ceremony superseded by a new one"
                        );
                    }
                }
            }
        }

        (session.challenge.clone(), session)
    }

    /// The most recently started live session of `kind`.
    pub fn current_session(&self, kind: CeremonyKind) -> Result<Session, SessionError> {
        let now = Instant::now();
        match self.table(kind) {
            SessionTable::Keyed(map) => map
                .iter()
                .filter(|entry| entry.is_live(now))
                .max_by_key(|entry| entry.session.created_at)
                .map(|entry| entry.session.clone())
                .ok_or(SessionError::NotStarted(kind)),
            SessionTable::Single(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.session.clone())
                .ok_or(SessionError::NotStarted(kind)),
        }
    }

    /// Consume the session whose challenge equals `challenge`.
    ///
    /// A non-matching challenge leaves pending sessions untouched.
    pub fn take_session(
        &self,
        kind: CeremonyKind,
        challenge: &Challenge,
    ) -> Result<Session, SessionError> {
        let now = Instant::now();
        match self.table(kind) {
            SessionTable::Keyed(map) => match map.remove(challenge) {
                Some((_, entry)) if entry.is_live(now) => Ok(entry.session),
                Some(_) => Err(SessionError::Expired(kind)),
                None if map.is_empty() => Err(SessionError::NotStarted(kind)),
                None => Err(SessionError::Mismatch(kind)),
            },
            SessionTable::Single(slot) => {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                let (matches, live) = match slot.as_ref() {
                    None => return Err(SessionError::NotStarted(kind)),
                    Some(entry) => (entry.session.challenge == *challenge, entry.is_live(now)),
                };
                if !matches {
                    return Err(SessionError::Mismatch(kind));
                }
                let entry = slot.take().ok_or(SessionError::NotStarted(kind))?;
                if live {
                    Ok(entry.session)
                } else {
                    Err(SessionError::Expired(kind))
                }
            }
        }
    }

    /// Drop expired sessions of both kinds, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        [&self.registration, &self.authentication]
            .into_iter()
            .map(|table| match table {
                SessionTable::Keyed(map) => {
                    let before = map.len();
                    map.retain(|_, entry| entry.is_live(now));
                    before.saturating_sub(map.len())
                }
                SessionTable::Single(slot) => {
                    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    let expired = matches!(slot.as_ref(), Some(entry) if !entry.is_live(now));
                    if expired {
                        *slot = None;
                        1
                    } else {
                        0
                    }
                }
            })
            .sum()
    }

    /// Number of pending (possibly expired, not yet swept) sessions of `kind`.
    pub fn pending(&self, kind: CeremonyKind) -> usize {
        match self.table(kind) {
            SessionTable::Keyed(map) => map.len(),
            SessionTable::Single(slot) => {
                usize::from(slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("scope", &self.scope)
            .field("ttl", &self.ttl)
            .field("registration", &self.pending(CeremonyKind::Registration))
            .field("authentication", &self.pending(CeremonyKind::Authentication))
            .finish()
    }
}
