//! Core service façade and bootstrap helpers.
//!
//! This crate wires the sync engine's pieces (database pool, HTTP client,
//! token provider, orchestrator, executor and job queue) into a single
//! [`SyncService`]. Server and desktop hosts enable the `desktop-shims`
//! feature (which depends on `bridge-desktop`) and call [`bootstrap`];
//! embedding hosts and tests inject their own parts through
//! [`SyncService::from_parts`].

pub mod error;
pub mod schedule;
pub mod service;

pub use error::{Result, ServiceError};
pub use schedule::ScheduleHandle;
pub use service::{RunSummary, ServiceParts, SyncService, MAX_HISTORY_LIMIT};

pub use core_auth::{AccessCredential, UserId};
pub use core_runtime::{SyncSettings, SyncSettingsBuilder};
pub use core_sync::{JobId, JobResultStatus, JobState, JobStatus, RunStatus, SyncRequest};

/// Build a service from validated settings using the native bridges.
///
/// Opens (and migrates) the database, builds the reqwest client and the
/// refreshing token provider, then starts the job workers.
///
/// ```ignore
/// use core_service::{bootstrap, SyncSettings};
///
/// let settings = SyncSettings::from_env()?;
/// let service = bootstrap(settings).await?;
/// let job_id = service.enqueue(user_id, false, None).await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap(settings: SyncSettings) -> Result<SyncService> {
    use std::sync::Arc;

    use bridge_desktop::ReqwestHttpClient;
    use bridge_traits::{HttpClient, SystemClock};
    use core_auth::{
        OAuthClient, OAuthConfig, RefreshingTokenProvider, SqliteCredentialStore,
        SqliteUserRepository,
    };
    use core_library::{create_pool, DatabaseConfig};
    use core_sync::{SqliteConfigStore, SqliteRunStore};

    let pool = create_pool(DatabaseConfig::from_url(settings.database_url.as_str())).await?;

    let http_client: Arc<dyn HttpClient> = Arc::new(
        ReqwestHttpClient::try_new(settings.request_timeout, settings.connect_timeout)
            .map_err(|e| ServiceError::InitializationFailed(e.to_string()))?,
    );

    let credentials = Arc::new(SqliteCredentialStore::new(pool.clone()));
    let oauth = OAuthClient::new(
        OAuthConfig {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            token_url: settings.token_url.clone(),
        },
        http_client.clone(),
        Arc::new(SystemClock),
    );
    let tokens = RefreshingTokenProvider::new(credentials.clone(), oauth, Arc::new(SystemClock))
        .with_refresh_buffer(settings.token_refresh_buffer);

    tracing::info!(
        api_base_url = %settings.api_base_url,
        workers = settings.jobs.workers,
        "Bootstrapping sync service"
    );

    Ok(SyncService::from_parts(ServiceParts {
        users: Arc::new(SqliteUserRepository::new(pool.clone())),
        credentials,
        configs: Arc::new(SqliteConfigStore::new(pool.clone())),
        runs: Arc::new(SqliteRunStore::new(pool)),
        tokens: Arc::new(tokens),
        http_client,
        api_base_url: settings.api_base_url,
        retry_policy: settings.retry,
        jobs: settings.jobs,
    }))
}
