//! In-memory credential store
//!
//! Development and test backend. Data is lost on restart.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{CredentialStore, StoreError};
use crate::model::{NewUser, User, UserUpdate};

#[derive(Default)]
pub struct MemoryStore {
    /// user id -> user
    users: DashMap<Uuid, User>,
    /// username -> user id
    usernames: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        match self.usernames.entry(new.username.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(new.username)),
            Entry::Vacant(slot) => {
                let user = User {
                    id: new.id,
                    username: new.username,
                    display_name: new.display_name,
                    challenge: new.challenge,
                    credential_blob: new.credential_blob,
                };
                slot.insert(user.id);
                self.users.insert(user.id, user.clone());
                Ok(user)
            }
        }
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        self.users
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        let id = self
            .usernames
            .get(username)
            .map(|entry| *entry.value())
            .ok_or_else(|| StoreError::NotFound(username.to_string()))?;
        self.get_user_by_id(id).await
    }

    async fn get_user_by_challenge(&self, challenge: &str) -> Result<User, StoreError> {
        self.users
            .iter()
            .find(|entry| entry.challenge.as_deref() == Some(challenge))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("challenge {}", challenge)))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User, StoreError> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let (_, user) = self
            .users
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.usernames.remove(&user.username);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("users", &self.users.len())
            .finish()
    }
}
