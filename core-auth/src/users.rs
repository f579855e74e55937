//! # User Repository
//!
//! Users are created by the host after its login handshake and looked up by
//! the job executor before every sync. Deleting a user cascades to the stored
//! credential, sync configs and run history.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::{AuthError, Result};
use crate::types::UserId;

/// A registered user of the sync service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Account id on the remote music service
    pub remote_user_id: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(remote_user_id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            remote_user_id: remote_user_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Repository trait for user persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>>;

    async fn find_by_remote_id(&self, remote_user_id: &str) -> Result<Option<User>>;

    /// Insert the user, or return the existing record for the same remote id.
    async fn upsert(&self, user: &User) -> Result<User>;

    /// Delete the user and everything that cascades from it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] if no such user exists.
    async fn delete(&self, id: &UserId) -> Result<()>;
}

/// SQLite implementation of [`UserRepository`]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    remote_user_id: String,
    created_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self> {
        let created_at = Utc
            .timestamp_millis_opt(row.created_at)
            .single()
            .ok_or_else(|| AuthError::Database(format!("Invalid created_at: {}", row.created_at)))?;

        Ok(User {
            id: UserId::from_string(&row.id)?,
            remote_user_id: row.remote_user_id,
            created_at,
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, remote_user_id, created_at FROM users WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_remote_id(&self, remote_user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, remote_user_id, created_at FROM users WHERE remote_user_id = ?",
        )
        .bind(remote_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

        row.map(User::try_from).transpose()
    }

    async fn upsert(&self, user: &User) -> Result<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, remote_user_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (remote_user_id) DO NOTHING
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.remote_user_id)
        .bind(user.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

        self.find_by_remote_id(&user.remote_user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(user.remote_user_id.clone()))
    }

    async fn delete(&self, id: &UserId) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound(id.to_string()));
        }

        Ok(())
    }
}
