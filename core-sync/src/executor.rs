//! # Job Executor
//!
//! Runs one orchestrator invocation as a retryable background unit and
//! reduces its outcome to a sanitized [`JobResult`].
//!
//! ## Retry Policy
//!
//! Transient failures (rate limiting, 5xx, transport and unclassified
//! errors) are retried while `retries < max_retries`, after
//! `min(max_retry_delay, 2^retries)` seconds. Once the ceiling is reached, or
//! on a permanent failure, the job finishes with the generic `error` status.
//! Failures never escape the executor.

use std::sync::Arc;
use std::time::Duration;

use core_auth::{UserId, UserRepository};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::orchestrator::{SyncOrchestrator, SyncOutcome, SyncRequest};
use crate::run::RunId;
use crate::SyncError;

/// Retry ceiling when none is configured
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Longest wait between two attempts of the same job
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub user_id: UserId,
    pub sync: SyncRequest,
}

/// Coarse, non-sensitive outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResultStatus {
    Success,
    NotFound,
    Unauthorized,
    /// The user does not exist; the orchestrator was not invoked
    NotAuthenticated,
    Error,
    Cancelled,
}

impl JobResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResultStatus::Success => "success",
            JobResultStatus::NotFound => "not_found",
            JobResultStatus::Unauthorized => "unauthorized",
            JobResultStatus::NotAuthenticated => "not_authenticated",
            JobResultStatus::Error => "error",
            JobResultStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a job that ended with this status counts as succeeded
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            JobResultStatus::Success
                | JobResultStatus::NotFound
                | JobResultStatus::Unauthorized
                | JobResultStatus::NotAuthenticated
        )
    }
}

impl std::fmt::Display for JobResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary a job exposes to its caller. Carries no diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub status: JobResultStatus,
    pub run_id: Option<RunId>,
    pub items_added: Option<u32>,
}

impl JobResult {
    fn bare(status: JobResultStatus) -> Self {
        Self {
            status,
            run_id: None,
            items_added: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Finished(JobResult),
    /// Run the job again after the delay
    Retry { after: Duration },
}

/// `min(max_delay, 2^retries)` seconds
pub fn retry_delay(retries: u32, max_delay: Duration) -> Duration {
    let exponential = Duration::from_secs(1u64.checked_shl(retries).unwrap_or(u64::MAX));
    exponential.min(max_delay)
}

pub struct JobExecutor {
    users: Arc<dyn UserRepository>,
    orchestrator: Arc<SyncOrchestrator>,
    max_retries: u32,
    max_retry_delay: Duration,
}

impl JobExecutor {
    pub fn new(users: Arc<dyn UserRepository>, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            users,
            orchestrator,
            max_retries: DEFAULT_MAX_RETRIES,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Execute `request`; `retries` counts the attempts already retried.
    #[instrument(skip(self, request, cancel), fields(user_id = %request.user_id))]
    pub async fn execute(
        &self,
        request: &JobRequest,
        retries: u32,
        cancel: &CancellationToken,
    ) -> JobDisposition {
        let result = match self.users.find_by_id(&request.user_id).await {
            Ok(Some(_)) => {
                self.orchestrator
                    .sync(request.user_id, request.sync, cancel)
                    .await
            }
            Ok(None) => {
                info!("User not found, job finished as not authenticated");
                return JobDisposition::Finished(JobResult::bare(
                    JobResultStatus::NotAuthenticated,
                ));
            }
            Err(e) => Err(SyncError::from(e)),
        };

        match result {
            Ok(report) => {
                let result = match report.outcome {
                    SyncOutcome::Success { items_added } => JobResult {
                        status: JobResultStatus::Success,
                        run_id: Some(report.run_id),
                        items_added: Some(items_added),
                    },
                    SyncOutcome::NotFound => JobResult {
                        status: JobResultStatus::NotFound,
                        run_id: Some(report.run_id),
                        items_added: None,
                    },
                    SyncOutcome::Unauthorized => JobResult {
                        status: JobResultStatus::Unauthorized,
                        run_id: Some(report.run_id),
                        items_added: None,
                    },
                };
                JobDisposition::Finished(result)
            }
            Err(SyncError::Cancelled) => {
                info!("Job cancelled");
                JobDisposition::Finished(JobResult::bare(JobResultStatus::Cancelled))
            }
            Err(e) if e.is_transient() && retries < self.max_retries => {
                let after = retry_delay(retries, self.max_retry_delay);
                warn!(error = %e, retry_in_secs = after.as_secs(), "Transient failure, retrying");
                JobDisposition::Retry { after }
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Job failed");
                JobDisposition::Finished(JobResult::bare(JobResultStatus::Error))
            }
        }
    }
}
