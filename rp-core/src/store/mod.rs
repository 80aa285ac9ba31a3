//! Credential store contract
//!
//! The store exclusively owns [`User`] rows. Credentials live inside each row's
//! blob, so adding one is a read-modify-write of the whole blob. Updates are
//! last-writer-wins.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{CredentialRecord, NewUser, User, UserUpdate};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("username already taken: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError>;

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError>;

    /// Resolve the user currently holding `challenge` (base64url).
    async fn get_user_by_challenge(&self, challenge: &str) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Apply a partial update and return the merged row.
    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User, StoreError>;

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    /// Backend name for health reporting.
    fn backend(&self) -> &'static str;

    async fn check_health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Every credential known to the store, paired with its owner.
    ///
    /// Scans all users; cost grows with the user count.
    async fn all_credentials(&self) -> Result<Vec<(Uuid, CredentialRecord)>, StoreError> {
        let users = self.list_users().await?;
        Ok(users
            .into_iter()
            .flat_map(|user| {
                let owner = user.id;
                user.credentials()
                    .into_iter()
                    .map(move |record| (owner, record))
            })
            .collect())
    }
}
