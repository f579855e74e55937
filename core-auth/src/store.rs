//! # Credential Store
//!
//! Persistence for the one renewable credential each user holds. Only the
//! token provider and the host's login handshake write here.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::{AuthError, Result};
use crate::types::{AccessCredential, UserId};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<AccessCredential>>;

    /// Insert or replace the credential for `user_id`.
    async fn save(&self, user_id: &UserId, credential: &AccessCredential) -> Result<()>;
}

/// SQLite implementation of [`CredentialStore`]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct CredentialRow {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    scope: Option<String>,
}

impl TryFrom<CredentialRow> for AccessCredential {
    type Error = AuthError;

    fn try_from(row: CredentialRow) -> Result<Self> {
        let expires_at = Utc
            .timestamp_millis_opt(row.expires_at)
            .single()
            .ok_or_else(|| AuthError::Database(format!("Invalid expires_at: {}", row.expires_at)))?;

        Ok(AccessCredential {
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at,
            scope: row.scope,
        })
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<AccessCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT access_token, refresh_token, expires_at, scope
            FROM oauth_credentials
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

        row.map(AccessCredential::try_from).transpose()
    }

    async fn save(&self, user_id: &UserId, credential: &AccessCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_credentials (
                user_id, access_token, refresh_token, expires_at, scope, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at.timestamp_millis())
        .bind(&credential.scope)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

        Ok(())
    }
}
