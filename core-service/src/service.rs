//! [`SyncService`]: the entry point host applications talk to.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::http::{HttpClient, RetryPolicy};
use core_auth::{AccessCredential, CredentialStore, TokenProvider, User, UserId, UserRepository};
use core_runtime::JobSettings;
use core_sync::{
    ConfigStore, JobExecutor, JobId, JobQueue, JobRequest, JobStatus, QueueStats, Run, RunId,
    RunRecorder, RunStatus, RunStore, SyncOrchestrator, SyncRequest,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::{Result, ServiceError};
use crate::schedule::ScheduleHandle;

/// Largest page of run history a caller may request
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// One run as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: RunId,
    pub config_id: String,
    pub status: RunStatus,
    /// Unix milliseconds
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub items_added: Option<u32>,
    pub error_message: Option<String>,
}

impl From<Run> for RunSummary {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            config_id: run.config_id.as_str(),
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            items_added: run.tracks_added_count,
            error_message: run.error_message,
        }
    }
}

/// Everything [`SyncService::from_parts`] wires together.
pub struct ServiceParts {
    pub users: Arc<dyn UserRepository>,
    pub credentials: Arc<dyn CredentialStore>,
    pub configs: Arc<dyn ConfigStore>,
    pub runs: Arc<dyn RunStore>,
    pub tokens: Arc<dyn TokenProvider>,
    pub http_client: Arc<dyn HttpClient>,
    pub api_base_url: String,
    pub retry_policy: RetryPolicy,
    pub jobs: JobSettings,
}

pub struct SyncService {
    users: Arc<dyn UserRepository>,
    credentials: Arc<dyn CredentialStore>,
    runs: Arc<dyn RunStore>,
    queue: Arc<JobQueue>,
    schedules: CancellationToken,
}

impl SyncService {
    /// Build the service from explicit dependencies and start its workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_parts(parts: ServiceParts) -> Self {
        let recorder = RunRecorder::new(parts.runs.clone());
        let orchestrator = SyncOrchestrator::new(
            parts.configs,
            recorder,
            parts.tokens,
            parts.http_client,
        )
        .with_api_base_url(parts.api_base_url)
        .with_retry_policy(parts.retry_policy);

        let executor = JobExecutor::new(parts.users.clone(), Arc::new(orchestrator))
            .with_max_retries(parts.jobs.max_retries)
            .with_max_retry_delay(parts.jobs.max_retry_delay);
        let queue = JobQueue::start(Arc::new(executor), &parts.jobs);

        Self {
            users: parts.users,
            credentials: parts.credentials,
            runs: parts.runs,
            queue: Arc::new(queue),
            schedules: CancellationToken::new(),
        }
    }

    /// Queue a sync for `user_id` and return the job id.
    ///
    /// # Errors
    ///
    /// Fails if `max_items` is outside `1..=500` or the service is shut down.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn enqueue(
        &self,
        user_id: UserId,
        dry_run: bool,
        max_items: Option<u32>,
    ) -> Result<JobId> {
        let request = JobRequest {
            user_id,
            sync: SyncRequest { dry_run, max_items },
        };
        Ok(self.queue.enqueue(request).await?)
    }

    pub async fn job_status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.queue.status(job_id).await
    }

    /// Request cancellation of a queued or running job
    pub async fn cancel_job(&self, job_id: &JobId) -> bool {
        self.queue.cancel(job_id).await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Most recent runs of `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidArgument`] unless `limit` is in `1..=100`.
    pub async fn run_history(&self, user_id: &UserId, limit: u32) -> Result<Vec<RunSummary>> {
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(ServiceError::InvalidArgument(format!(
                "limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }

        let runs = self.runs.history_for_user(user_id, limit).await?;
        Ok(runs.into_iter().map(RunSummary::from).collect())
    }

    /// Enqueue a sync for `user_id` every `interval` until the handle is
    /// cancelled or the service shuts down. The first sync is queued after
    /// one full interval.
    ///
    /// # Errors
    ///
    /// Fails if `interval` is zero or `request` is invalid.
    pub fn schedule_weekly(
        &self,
        user_id: UserId,
        interval: Duration,
        request: SyncRequest,
    ) -> Result<ScheduleHandle> {
        if interval.is_zero() {
            return Err(ServiceError::InvalidArgument(
                "schedule interval must be greater than zero".to_string(),
            ));
        }
        request.validate()?;

        Ok(ScheduleHandle::spawn(
            self.queue.clone(),
            JobRequest {
                user_id,
                sync: request,
            },
            interval,
            self.schedules.child_token(),
        ))
    }

    /// Store a user and the credential obtained by the host's login
    /// handshake. Re-registering the same remote user replaces the credential.
    #[instrument(skip(self, credential))]
    pub async fn register_user(
        &self,
        remote_user_id: &str,
        credential: &AccessCredential,
    ) -> Result<UserId> {
        if remote_user_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "remote user id must not be empty".to_string(),
            ));
        }

        let user = self.users.upsert(&User::new(remote_user_id)).await?;
        self.credentials.save(&user.id, credential).await?;
        info!(user_id = %user.id, "User registered");
        Ok(user.id)
    }

    /// Delete a user together with its credential, configs and runs
    pub async fn remove_user(&self, user_id: &UserId) -> Result<()> {
        self.users.delete(user_id).await?;
        info!(user_id = %user_id, "User removed");
        Ok(())
    }

    /// Stop all schedules, cancel running jobs and wait for the workers.
    pub async fn shutdown(&self) {
        self.schedules.cancel();
        self.queue.shutdown().await;
    }
}
