//! # Sync Engine
//!
//! Copies new tracks from a user's "Discover Weekly" playlist into
//! "Saved Weekly" and keeps an audit trail of every attempt.
//!
//! ## Overview
//!
//! This module manages:
//! - The per-user sync configuration, resolved or created on first use
//! - Runs, persisted as `running` before any remote call and finished
//!   exactly once
//! - The sync algorithm itself: playlist lookup, deduplication against the
//!   destination, and batched additions
//! - Background execution with bounded retries and coarse job status
//!
//! ## Components
//!
//! - **Run State Machine** (`run`): validated transitions from `running` to a terminal status
//! - **Repository** (`repository`): SQLite persistence for configs and runs
//! - **Run Recorder** (`recorder`): applies and persists run transitions
//! - **Sync Orchestrator** (`orchestrator`): one sync, start to finish
//! - **Job Executor** (`executor`): retry classification and result sanitizing
//! - **Job Queue** (`queue`): worker pool, job status and cancellation

pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod lock;
pub mod orchestrator;
pub mod queue;
pub mod recorder;
pub mod repository;
pub mod run;
pub mod sync_config;

pub use diagnostics::{sanitize_diagnostic, truncate_error, MAX_ERROR_LEN};
pub use error::{Result, SyncError};
pub use executor::{
    JobDisposition, JobExecutor, JobRequest, JobResult, JobResultStatus, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_RETRY_DELAY,
};
pub use lock::ConfigLocks;
pub use orchestrator::{
    SyncOrchestrator, SyncOutcome, SyncReport, SyncRequest, TrackSelector, DEFAULT_MAX_ITEMS,
    MAX_REQUESTED_ITEMS,
};
pub use queue::{JobId, JobQueue, JobState, JobStatus, QueueStats};
pub use recorder::RunRecorder;
pub use repository::{ConfigStore, RunStore, SqliteConfigStore, SqliteRunStore};
pub use run::{Run, RunId, RunStatus};
pub use sync_config::{Strategy, SyncConfig, SyncConfigId};

/// Current wall-clock time in Unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
