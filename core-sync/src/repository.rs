//! # Sync Repositories
//!
//! Database persistence for sync configurations and runs.
//!
//! ## Overview
//!
//! - [`ConfigStore`]: idempotent lookup-or-create of the per-user config and
//!   recording of resolved collection ids
//! - [`RunStore`]: run creation, the single terminal update, and per-user
//!   history (most recent first)

use async_trait::async_trait;
use core_auth::UserId;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

use crate::run::{Run, RunId, RunStatus};
use crate::sync_config::{Strategy, SyncConfig, SyncConfigId};
use crate::{now_millis, Result, SyncError};

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository trait for sync configuration persistence
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Return the config for (`user_id`, `strategy`), creating it on first use.
    ///
    /// Calling this any number of times, concurrently or not, yields the same
    /// record.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the database fails
    async fn get_or_create(&self, user_id: &UserId, strategy: Strategy) -> Result<SyncConfig>;

    /// Persist the resolved source and destination collection ids
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigNotFound`] if the config no longer exists
    async fn update_collections(
        &self,
        id: &SyncConfigId,
        source_collection_id: &str,
        destination_collection_id: &str,
    ) -> Result<()>;

    async fn find_by_id(&self, id: &SyncConfigId) -> Result<Option<SyncConfig>>;
}

/// Repository trait for run persistence
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a freshly started run
    async fn insert(&self, run: &Run) -> Result<()>;

    /// Persist the terminal state of `run`.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::InvalidStateTransition`] if `run` is not
    /// terminal or the stored run already is, and with
    /// [`SyncError::RunNotFound`] if the run does not exist.
    async fn finish(&self, run: &Run) -> Result<()>;

    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>>;

    /// Runs across all of the user's configs, newest first
    async fn history_for_user(&self, user_id: &UserId, limit: u32) -> Result<Vec<Run>>;
}

// ============================================================================
// SQLite Implementations
// ============================================================================

/// SQLite implementation of [`ConfigStore`]
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// SQLite implementation of [`RunStore`]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ConfigRow {
    id: String,
    user_id: String,
    strategy_json: String,
    source_collection_id: Option<String>,
    destination_collection_id: Option<String>,
    is_enabled: bool,
    created_at: i64,
}

impl TryFrom<ConfigRow> for SyncConfig {
    type Error = SyncError;

    fn try_from(row: ConfigRow) -> Result<Self> {
        Ok(SyncConfig {
            id: SyncConfigId::from_string(&row.id)?,
            user_id: UserId::from_string(&row.user_id)?,
            strategy: Strategy::from_json(&row.strategy_json)?,
            source_collection_id: row.source_collection_id,
            destination_collection_id: row.destination_collection_id,
            is_enabled: row.is_enabled,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    config_id: String,
    status: String,
    started_at: i64,
    finished_at: Option<i64>,
    tracks_added_count: Option<i64>,
    error_message: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = SyncError;

    fn try_from(row: RunRow) -> Result<Self> {
        let tracks_added_count = row
            .tracks_added_count
            .map(|count| {
                u32::try_from(count)
                    .map_err(|_| SyncError::Database(format!("Invalid tracks_added_count: {}", count)))
            })
            .transpose()?;

        Ok(Run {
            id: RunId::from_string(&row.id)?,
            config_id: SyncConfigId::from_string(&row.config_id)?,
            status: RunStatus::from_str(&row.status)?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            tracks_added_count,
            error_message: row.error_message,
        })
    }
}

const CONFIG_COLUMNS: &str = "id, user_id, strategy_json, source_collection_id, \
     destination_collection_id, is_enabled, created_at";

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get_or_create(&self, user_id: &UserId, strategy: Strategy) -> Result<SyncConfig> {
        let candidate = SyncConfig::new(*user_id, strategy);

        sqlx::query(
            r#"
            INSERT INTO sync_configs (
                id, user_id, strategy_kind, strategy_json, is_enabled, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, strategy_kind) DO NOTHING
            "#,
        )
        .bind(candidate.id.as_str())
        .bind(user_id.as_str())
        .bind(strategy.kind())
        .bind(strategy.to_json()?)
        .bind(candidate.is_enabled)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let row = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {} FROM sync_configs WHERE user_id = ? AND strategy_kind = ?",
            CONFIG_COLUMNS
        ))
        .bind(user_id.as_str())
        .bind(strategy.kind())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?
        .ok_or_else(|| SyncError::ConfigNotFound {
            config_id: candidate.id.as_str(),
        })?;

        SyncConfig::try_from(row)
    }

    async fn update_collections(
        &self,
        id: &SyncConfigId,
        source_collection_id: &str,
        destination_collection_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_configs
            SET source_collection_id = ?, destination_collection_id = ?
            WHERE id = ?
            "#,
        )
        .bind(source_collection_id)
        .bind(destination_collection_id)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::ConfigNotFound {
                config_id: id.as_str(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncConfigId) -> Result<Option<SyncConfig>> {
        let row = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {} FROM sync_configs WHERE id = ?",
            CONFIG_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncConfig::try_from).transpose()
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn insert(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, config_id, status, started_at, finished_at,
                tracks_added_count, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.config_id.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.tracks_added_count.map(i64::from))
        .bind(&run.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn finish(&self, run: &Run) -> Result<()> {
        if !run.status.is_terminal() {
            return Err(SyncError::InvalidStateTransition {
                from: RunStatus::Running.as_str().to_string(),
                to: run.status.as_str().to_string(),
                reason: "A run can only be finished with a terminal status".to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = ?, finished_at = ?, tracks_added_count = ?, error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.finished_at.unwrap_or_else(now_millis))
        .bind(run.tracks_added_count.map(i64::from))
        .bind(&run.error_message)
        .bind(run.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(&run.id).await? {
                None => Err(SyncError::RunNotFound {
                    run_id: run.id.as_str(),
                }),
                Some(stored) => Err(SyncError::InvalidStateTransition {
                    from: stored.status.as_str().to_string(),
                    to: run.status.as_str().to_string(),
                    reason: "Run is already finished".to_string(),
                }),
            };
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, config_id, status, started_at, finished_at,
                   tracks_added_count, error_message
            FROM sync_runs
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(Run::try_from).transpose()
    }

    async fn history_for_user(&self, user_id: &UserId, limit: u32) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT r.id, r.config_id, r.status, r.started_at, r.finished_at,
                   r.tracks_added_count, r.error_message
            FROM sync_runs r
            JOIN sync_configs c ON c.id = r.config_id
            WHERE c.user_id = ?
            ORDER BY r.started_at DESC, r.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(Run::try_from).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use core_auth::{SqliteUserRepository, User, UserRepository};
    use core_library::create_test_pool;

    async fn setup() -> (SqlitePool, UserId) {
        let pool = create_test_pool().await.unwrap();
        let user = SqliteUserRepository::new(pool.clone())
            .upsert(&User::new("remote-user"))
            .await
            .unwrap();
        (pool, user.id)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (pool, user_id) = setup().await;
        let store = SqliteConfigStore::new(pool.clone());

        let first = store
            .get_or_create(&user_id, Strategy::DiscoverWeekly)
            .await
            .unwrap();
        let second = store
            .get_or_create(&user_id, Strategy::DiscoverWeekly)
            .await
            .unwrap();

        assert_eq!(first, second);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_configs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_for_unknown_user_fails() {
        let (pool, _) = setup().await;
        let store = SqliteConfigStore::new(pool);

        let result = store
            .get_or_create(&UserId::new(), Strategy::DiscoverWeekly)
            .await;
        assert!(matches!(result, Err(SyncError::Database(_))));
    }

    #[tokio::test]
    async fn test_update_collections() {
        let (pool, user_id) = setup().await;
        let store = SqliteConfigStore::new(pool);
        let config = store
            .get_or_create(&user_id, Strategy::DiscoverWeekly)
            .await
            .unwrap();

        store
            .update_collections(&config.id, "dw-id", "sw-id")
            .await
            .unwrap();

        let stored = store.find_by_id(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.source_collection_id.as_deref(), Some("dw-id"));
        assert_eq!(stored.destination_collection_id.as_deref(), Some("sw-id"));

        let missing = store
            .update_collections(&SyncConfigId::new(), "a", "b")
            .await;
        assert!(matches!(missing, Err(SyncError::ConfigNotFound { .. })));
    }

    #[tokio::test]
    async fn test_insert_and_finish_run() {
        let (pool, user_id) = setup().await;
        let config = SqliteConfigStore::new(pool.clone())
            .get_or_create(&user_id, Strategy::DiscoverWeekly)
            .await
            .unwrap();
        let runs = SqliteRunStore::new(pool);

        let run = Run::start(config.id);
        runs.insert(&run).await.unwrap();

        let stored = runs.find_by_id(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);

        let done = run.succeed(12).unwrap();
        runs.finish(&done).await.unwrap();

        let stored = runs.find_by_id(&done.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(stored.tracks_added_count, Some(12));
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_finished_run_cannot_be_rewritten() {
        let (pool, user_id) = setup().await;
        let config = SqliteConfigStore::new(pool.clone())
            .get_or_create(&user_id, Strategy::DiscoverWeekly)
            .await
            .unwrap();
        let runs = SqliteRunStore::new(pool);

        let run = Run::start(config.id);
        let run_id = run.id;
        runs.insert(&run).await.unwrap();
        runs.finish(&run.clone().succeed(1).unwrap()).await.unwrap();

        let err = runs.finish(&run.fail("late failure").unwrap()).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));

        let stored = runs.find_by_id(&run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_finish_unknown_run() {
        let (pool, _) = setup().await;
        let runs = SqliteRunStore::new(pool);

        let orphan = Run::start(SyncConfigId::new()).succeed(0).unwrap();
        let err = runs.finish(&orphan).await.unwrap_err();
        assert!(matches!(err, SyncError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let (pool, user_id) = setup().await;
        let config = SqliteConfigStore::new(pool.clone())
            .get_or_create(&user_id, Strategy::DiscoverWeekly)
            .await
            .unwrap();
        let runs = SqliteRunStore::new(pool);

        let mut ids = Vec::new();
        for offset in 0..5 {
            let mut run = Run::start(config.id);
            run.started_at += offset;
            runs.insert(&run).await.unwrap();
            ids.push(run.id);
        }

        let history = runs.history_for_user(&user_id, 3).await.unwrap();
        let history_ids: Vec<RunId> = history.iter().map(|run| run.id).collect();
        assert_eq!(history_ids, vec![ids[4], ids[3], ids[2]]);

        let other = runs.history_for_user(&UserId::new(), 10).await.unwrap();
        assert!(other.is_empty());
    }
}
