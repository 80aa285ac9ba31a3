//! Credential blob migration.
//!
//! Older writers stored a bare record object, a backtick-wrapped value, or
//! records with foreign key spellings. Reads already tolerate those shapes;
//! this command rewrites them once so the stored form is the canonical array.

use anyhow::{Context, Result};
use colored::Colorize;
use rp_core::codec::{decode_credential_blob, encode_credential_blob, is_canonical_blob};
use rp_core::{CredentialStore, UserUpdate};
use tracing::{debug, info, warn};

/// Counts reported after a migration pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub scanned: usize,
    pub rewritten: usize,
    /// Unreadable blobs left as stored
    pub skipped: usize,
}

/// Blob spellings that legitimately hold no credentials.
fn is_empty_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('`')
        .and_then(|rest| rest.strip_suffix('`'))
        .unwrap_or(trimmed)
        .trim();
    matches!(inner, "" | "{}" | "[]")
}

pub async fn execute(store: &dyn CredentialStore, dry_run: bool) -> Result<MigrationSummary> {
    let users = store.list_users().await.context("Failed to list users")?;
    let mut summary = MigrationSummary {
        scanned: users.len(),
        ..MigrationSummary::default()
    };

    for user in users {
        if is_canonical_blob(&user.credential_blob) {
            debug!(user_id = %user.id, "Blob already canonical");
            continue;
        }

        let records = decode_credential_blob(&user.credential_blob);
        if records.is_empty() && !is_empty_placeholder(&user.credential_blob) {
            warn!(
                user_id = %user.id,
                blob_len = user.credential_blob.len(),
                "Unreadable credential blob, leaving it untouched"
            );
            println!(
                "{} {} (unreadable blob)",
                "Skipped".red(),
                user.username.bold()
            );
            summary.skipped += 1;
            continue;
        }

        let blob = encode_credential_blob(&records)
            .with_context(|| format!("Failed to encode credential blob for {}", user.username))?;

        if dry_run {
            println!(
                "{} {} ({} credential(s))",
                "Would rewrite".yellow(),
                user.username.bold(),
                records.len()
            );
        } else {
            store
                .update_user(user.id, UserUpdate::default().credential_blob(blob))
                .await
                .with_context(|| format!("Failed to update user {}", user.username))?;
            info!(user_id = %user.id, credentials = records.len(), "Rewrote credential blob");
            println!(
                "{} {} ({} credential(s))",
                "Rewrote".green(),
                user.username.bold(),
                records.len()
            );
        }
        summary.rewritten += 1;
    }

    let verb = if dry_run { "need rewriting" } else { "rewritten" };
    println!(
        "{} of {} user(s) {}, {} skipped",
        summary.rewritten, summary.scanned, verb, summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_core::{MemoryStore, NewUser};
    use uuid::Uuid;

    async fn add_user(store: &MemoryStore, username: &str, blob: &str) -> Uuid {
        let id = Uuid::new_v4();
        store
            .create_user(NewUser {
                id,
                username: username.into(),
                display_name: username.into(),
                challenge: None,
                credential_blob: blob.into(),
            })
            .await
            .unwrap();
        id
    }

    const LEGACY: &str = r#"`{"id":"Y3JlZC0x","publicKey":{},"signCount":3,"transports":null}`"#;

    #[tokio::test]
    async fn test_rewrites_legacy_blobs_only() {
        let store = MemoryStore::new();
        add_user(&store, "alice", "[]").await;
        let bob = add_user(&store, "bob", LEGACY).await;

        let summary = execute(&store, false).await.unwrap();
        assert_eq!(
            summary,
            MigrationSummary {
                scanned: 2,
                rewritten: 1,
                skipped: 0,
            }
        );

        let bob = store.get_user_by_id(bob).await.unwrap();
        assert!(is_canonical_blob(&bob.credential_blob));
        let records = bob.credentials();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "Y3JlZC0x");
        assert_eq!(records[0].sign_count, 3);
    }

    #[tokio::test]
    async fn test_unreadable_blob_is_kept() {
        let store = MemoryStore::new();
        let garbled = r#"{"ID":"AQI","PublicKey":"pQEC"#;
        let carol = add_user(&store, "carol", garbled).await;
        add_user(&store, "dave", "`{}`").await;

        let summary = execute(&store, false).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rewritten, 1);

        let carol = store.get_user_by_id(carol).await.unwrap();
        assert_eq!(carol.credential_blob, garbled);
    }

    #[test]
    fn test_empty_placeholders() {
        for blob in ["", "  ", "{}", "[]", "`[]`", "` {} `"] {
            assert!(is_empty_placeholder(blob), "{:?}", blob);
        }
        assert!(!is_empty_placeholder("garbage"));
        assert!(!is_empty_placeholder("`x`"));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let store = MemoryStore::new();
        let bob = add_user(&store, "bob", LEGACY).await;

        let summary = execute(&store, true).await.unwrap();
        assert_eq!(summary.rewritten, 1);

        let bob = store.get_user_by_id(bob).await.unwrap();
        assert_eq!(bob.credential_blob, LEGACY);
    }
}
