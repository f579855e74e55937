use core_auth::AuthError;
use provider_spotify::SpotifyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] SpotifyError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Sync config {config_id} not found")]
    ConfigNotFound { config_id: String },

    #[error("Sync run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid run status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job queue is shut down")]
    QueueClosed,

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether retrying the whole job may succeed.
    ///
    /// Remote errors defer to their own classification. Database and auth
    /// plumbing failures are unclassified and retried. Everything else
    /// describes a state a retry cannot change.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Auth(_) | SyncError::Database(_) => true,
            SyncError::ConfigNotFound { .. }
            | SyncError::RunNotFound { .. }
            | SyncError::InvalidId(_)
            | SyncError::InvalidStatus(_)
            | SyncError::InvalidStateTransition { .. }
            | SyncError::InvalidRequest(_)
            | SyncError::QueueClosed
            | SyncError::Cancelled => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
