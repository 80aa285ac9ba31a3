//! User inspection commands.

use anyhow::{Context, Result};
use colored::Colorize;
use rp_core::{CredentialStore, User};
use tracing::info;
use uuid::Uuid;

/// Resolve a user by id when the argument parses as a UUID, else by username.
pub async fn find_user(store: &dyn CredentialStore, user: &str) -> Result<User> {
    let found = match Uuid::parse_str(user) {
        Ok(id) => store.get_user_by_id(id).await,
        Err(_) => store.get_user_by_username(user).await,
    };
    found.with_context(|| format!("Failed to load user {user}"))
}

pub async fn list(store: &dyn CredentialStore, json: bool) -> Result<()> {
    let users = store.list_users().await.context("Failed to list users")?;
    info!(count = users.len(), "Loaded users");

    if json {
        let rows: Vec<_> = users
            .iter()
            .map(|user| {
                serde_json::json!({
                    "id": user.id,
                    "username": user.username,
                    "displayName": user.display_name,
                    "credentials": user.credentials().len(),
                    "pendingChallenge": user.challenge.is_some(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("{}", "No users registered".dimmed());
        return Ok(());
    }

    for user in &users {
        println!(
            "{}  {}  {} credential(s){}",
            user.id.to_string().dimmed(),
            user.username.bold(),
            user.credentials().len(),
            if user.challenge.is_some() {
                "  (challenge pending)".yellow().to_string()
            } else {
                String::new()
            }
        );
    }
    println!("{} user(s)", users.len());
    Ok(())
}

pub async fn show(store: &dyn CredentialStore, user: &str) -> Result<()> {
    let user = find_user(store, user).await?;

    println!("{}", "User".bold());
    println!("  ID:           {}", user.id);
    println!("  Username:     {}", user.username);
    println!("  Display name: {}", user.display_name);
    println!(
        "  Challenge:    {}",
        user.challenge.as_deref().unwrap_or("none")
    );

    let credentials = user.credentials();
    println!();
    println!("{} ({})", "Credentials".bold(), credentials.len());
    for record in &credentials {
        println!("  {}", record.id.green());
        println!("    Sign count:  {}", record.sign_count);
        if !record.transports.is_empty() {
            println!("    Transports:  {}", record.transports.join(", "));
        }
        if let Some(attachment) = &record.attachment {
            println!("    Attachment:  {attachment}");
        }
        if let Some(created) = record.created_at {
            println!("    Created:     {}", created.to_rfc3339());
        }
    }
    Ok(())
}

pub async fn delete(store: &dyn CredentialStore, id: &str) -> Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("Invalid user id: {id}"))?;
    store
        .delete_user(id)
        .await
        .with_context(|| format!("Failed to delete user {id}"))?;

    info!(user_id = %id, "Deleted user");
    println!("{} {}", "Deleted".green().bold(), id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_core::{MemoryStore, NewUser};

    async fn seeded() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .create_user(NewUser {
                id,
                username: "alice".into(),
                display_name: "Alice".into(),
                challenge: None,
                credential_blob: "[]".into(),
            })
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_find_user_by_name_or_id() {
        let (store, id) = seeded().await;

        assert_eq!(find_user(&store, "alice").await.unwrap().id, id);
        assert_eq!(
            find_user(&store, &id.to_string()).await.unwrap().username,
            "alice"
        );
    }

    #[tokio::test]
    async fn test_missing_user_mentions_not_found() {
        let (store, _) = seeded().await;
        let err = find_user(&store, "ghost").await.unwrap_err();
        assert!(format!("{err:#}").contains("user not found"));
    }

    #[tokio::test]
    async fn test_delete_rejects_non_uuid() {
        let (store, _) = seeded().await;
        let err = delete(&store, "alice").await.unwrap_err();
        assert!(err.to_string().contains("Invalid user id"));
    }

    #[tokio::test]
    async fn test_delete_removes_user() {
        let (store, id) = seeded().await;
        delete(&store, &id.to_string()).await.unwrap();
        assert!(store.list_users().await.unwrap().is_empty());
    }
}
