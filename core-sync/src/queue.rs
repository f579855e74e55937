//! # Job Queue
//!
//! In-process pool of workers executing sync jobs.
//!
//! ## Overview
//!
//! Jobs are accepted by [`JobQueue::enqueue`], pushed onto a bounded channel
//! and picked up by one of N workers, each of which hands the job to the
//! [`JobExecutor`]. A job the executor asks to retry waits out its delay in a
//! separate task and is then re-queued, so a worker is never blocked by a
//! backoff. Delivery is at-least-once within the process.
//!
//! Finished jobs stay queryable for `finished_job_retention` and are pruned
//! on the next enqueue after that.
//!
//! ## Job States
//!
//! ```text
//! Pending ──→ Running ──→ Succeeded | Failed
//!               ↑  │
//!               │  ↓
//!             Retrying
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{JobQueue, JobRequest, SyncRequest};
//!
//! let queue = JobQueue::start(executor, &JobSettings::default());
//! let job_id = queue.enqueue(JobRequest { user_id, sync: SyncRequest::default() }).await?;
//!
//! if let Some(status) = queue.status(&job_id).await {
//!     println!("{:?}", status.state);
//! }
//!
//! queue.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use core_runtime::JobSettings;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::{JobDisposition, JobExecutor, JobRequest, JobResult, JobResultStatus};
use crate::run::RunId;
use crate::{Result, SyncError};

/// Type-safe job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidId(format!("{}: {}", s, e)))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    /// Waiting out a backoff before the next attempt
    Retrying,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Retrying => "retrying",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Externally visible status of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    /// Coarse outcome, set once the job is finished
    pub status: Option<JobResultStatus>,
    pub run_id: Option<RunId>,
    pub items_added: Option<u32>,
    /// Number of times the job has been handed to the executor
    pub attempts: u32,
}

impl JobStatus {
    fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Pending,
            status: None,
            run_id: None,
            items_added: None,
            attempts: 0,
        }
    }

    fn finish(&mut self, result: JobResult) {
        self.state = if result.status.is_completed() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.status = Some(result.status);
        self.run_id = result.run_id;
        self.items_added = result.items_added;
    }
}

/// Job counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub retrying: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.retrying + self.succeeded + self.failed
    }

    /// Jobs not yet finished
    pub fn active(&self) -> u64 {
        self.pending + self.running + self.retrying
    }
}

// ============================================================================
// Queue
// ============================================================================

struct JobEntry {
    status: JobStatus,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl JobEntry {
    fn finish(&mut self, result: JobResult) {
        self.status.finish(result);
        self.finished_at = Some(Instant::now());
    }

    fn is_expired(&self, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished_at| finished_at.elapsed() >= retention)
    }
}

struct QueuedJob {
    id: JobId,
    request: JobRequest,
    retries: u32,
}

type JobTable = Arc<RwLock<HashMap<JobId, JobEntry>>>;

#[derive(Clone)]
struct WorkerContext {
    executor: Arc<JobExecutor>,
    jobs: JobTable,
    sender: mpsc::Sender<QueuedJob>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    shutdown: CancellationToken,
}

pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    jobs: JobTable,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    retention: Duration,
}

impl JobQueue {
    /// Spawn `settings.workers` workers on the current tokio runtime.
    pub fn start(executor: Arc<JobExecutor>, settings: &JobSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let jobs: JobTable = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let context = WorkerContext {
            executor,
            jobs: jobs.clone(),
            sender: sender.clone(),
            receiver: Arc::new(Mutex::new(receiver)),
            shutdown: shutdown.clone(),
        };

        let workers = (0..settings.workers.max(1))
            .map(|worker| tokio::spawn(run_worker(worker, context.clone())))
            .collect();

        info!(workers = settings.workers.max(1), "Job queue started");

        Self {
            sender,
            jobs,
            shutdown,
            workers: Mutex::new(workers),
            retention: settings.finished_job_retention,
        }
    }

    /// Accept a job and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] for an out-of-range `max_items`
    /// and [`SyncError::QueueClosed`] after shutdown.
    pub async fn enqueue(&self, request: JobRequest) -> Result<JobId> {
        request.sync.validate()?;
        if self.shutdown.is_cancelled() {
            return Err(SyncError::QueueClosed);
        }

        let id = JobId::new();
        {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|_, entry| !entry.is_expired(self.retention));
            if jobs.len() < before {
                debug!(pruned = before - jobs.len(), "Pruned finished jobs");
            }
            jobs.insert(
                id,
                JobEntry {
                    status: JobStatus::pending(id),
                    cancel: self.shutdown.child_token(),
                    finished_at: None,
                },
            );
        }

        let job = QueuedJob {
            id,
            request,
            retries: 0,
        };
        if self.sender.send(job).await.is_err() {
            self.jobs.write().await.remove(&id);
            return Err(SyncError::QueueClosed);
        }

        debug!(job_id = %id, user_id = %request.user_id, "Job enqueued");
        Ok(id)
    }

    pub async fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.status.clone())
    }

    /// Request cancellation of a job. Returns `false` if the job is unknown
    /// or already finished.
    ///
    /// A running job stops at its next checkpoint; a pending or retrying job
    /// never runs again.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(entry) if !entry.status.state.is_terminal() => {
                entry.cancel.cancel();
                info!(job_id = %job_id, "Job cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats::default();
        for entry in jobs.values() {
            match entry.status.state {
                JobState::Pending => stats.pending += 1,
                JobState::Running => stats.running += 1,
                JobState::Retrying => stats.retrying += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Cancel every job and wait for the workers to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Job worker terminated abnormally");
            }
        }

        info!("Job queue stopped");
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// Workers
// ============================================================================

async fn run_worker(worker: usize, context: WorkerContext) {
    debug!(worker, "Job worker started");

    loop {
        let next = tokio::select! {
            _ = context.shutdown.cancelled() => None,
            job = next_job(&context.receiver) => job,
        };
        let Some(job) = next else {
            break;
        };
        process_job(&context, job).await;
    }

    debug!(worker, "Job worker stopped");
}

async fn next_job(receiver: &Mutex<mpsc::Receiver<QueuedJob>>) -> Option<QueuedJob> {
    receiver.lock().await.recv().await
}

async fn process_job(context: &WorkerContext, job: QueuedJob) {
    let cancel = {
        let mut jobs = context.jobs.write().await;
        let Some(entry) = jobs.get_mut(&job.id) else {
            warn!(job_id = %job.id, "Dequeued unknown job");
            return;
        };
        if entry.status.state.is_terminal() {
            return;
        }
        if entry.cancel.is_cancelled() {
            entry.finish(cancelled_result());
            return;
        }
        entry.status.state = JobState::Running;
        entry.status.attempts += 1;
        entry.cancel.clone()
    };

    let disposition = context
        .executor
        .execute(&job.request, job.retries, &cancel)
        .await;

    match disposition {
        JobDisposition::Finished(result) => {
            finish_job(&context.jobs, job.id, result).await;
        }
        JobDisposition::Retry { after } => {
            update_state(&context.jobs, job.id, JobState::Retrying).await;
            let context = context.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        finish_job(&context.jobs, job.id, cancelled_result()).await;
                    }
                    _ = tokio::time::sleep(after) => {
                        let id = job.id;
                        let retry = QueuedJob {
                            id,
                            request: job.request,
                            retries: job.retries + 1,
                        };
                        if context.sender.send(retry).await.is_err() {
                            finish_job(&context.jobs, id, cancelled_result()).await;
                        }
                    }
                }
            });
        }
    }
}

fn cancelled_result() -> JobResult {
    JobResult {
        status: JobResultStatus::Cancelled,
        run_id: None,
        items_added: None,
    }
}

async fn update_state(jobs: &JobTable, job_id: JobId, state: JobState) {
    if let Some(entry) = jobs.write().await.get_mut(&job_id) {
        entry.status.state = state;
    }
}

async fn finish_job(jobs: &JobTable, job_id: JobId, result: JobResult) {
    let mut jobs = jobs.write().await;
    if let Some(entry) = jobs.get_mut(&job_id) {
        entry.finish(result);
        info!(
            job_id = %job_id,
            state = entry.status.state.as_str(),
            status = result.status.as_str(),
            attempts = entry.status.attempts,
            "Job finished"
        );
    }
}
