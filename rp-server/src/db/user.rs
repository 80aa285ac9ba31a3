//! PostgreSQL-backed credential store
//!
//! One row per user; credentials live in the row's `credential_blob` text
//! column and are only ever written in the canonical array shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rp_core::model::{NewUser, User, UserUpdate};
use rp_core::store::{CredentialStore, StoreError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, username, display_name, challenge, credential_blob, created_at, updated_at";

/// User row as stored
#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    display_name: String,
    challenge: Option<String>,
    credential_blob: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            challenge: row.challenge,
            credential_blob: row.credential_blob,
        }
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Connect to PostgreSQL with a bounded pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("connection failed: {}", e)))?;

        tracing::info!(max_connections, "Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {}", e)))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, clause);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(User::from))
            .map_err(query_error)
    }
}

impl std::fmt::Debug for PgCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCredentialStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, display_name, challenge, credential_blob)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.display_name)
            .bind(&user.challenge)
            .bind(&user.credential_blob)
            .fetch_one(&self.pool)
            .await
            .map(User::from)
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Duplicate(user.username.clone())
                }
                other => query_error(other),
            })
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(User::from)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.fetch_one_where("username = $1", username)
            .await?
            .ok_or_else(|| StoreError::NotFound(username.to_string()))
    }

    async fn get_user_by_challenge(&self, challenge: &str) -> Result<User, StoreError> {
        // Stale challenges are not unique over time; the freshest holder wins
        self.fetch_one_where("challenge = $1 ORDER BY updated_at DESC LIMIT 1", challenge)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("no user holds challenge {}", challenge)))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {} FROM users ORDER BY created_at, username", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(User::from).collect())
            .map_err(query_error)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User, StoreError> {
        let (set_challenge, challenge) = match update.challenge {
            Some(challenge) => (true, challenge),
            None => (false, None),
        };
        let sql = format!(
            r#"
            UPDATE users
            SET
                display_name = COALESCE($2, display_name),
                challenge = CASE WHEN $3 THEN $4 ELSE challenge END,
                credential_blob = COALESCE($5, credential_blob),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(&update.display_name)
            .bind(set_challenge)
            .bind(&challenge)
            .bind(&update.credential_blob)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(User::from)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_keeps_blob_verbatim() {
        let row = UserRow {
            id: Uuid::new_v4(),
            username: "alice".into(),
            display_name: "Alice".into(),
            challenge: None,
            credential_blob: "`{}`".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let user = User::from(row);
        assert_eq!(user.credential_blob, "`{}`");
        assert!(user.credentials().is_empty());
    }
}
