//! # Run State Machine
//!
//! A run is one attempt at executing a sync. It is persisted as `running`
//! before any remote call and moves exactly once to a terminal status.
//!
//! ## State Machine
//!
//! ```text
//!            ┌──→ Success       (items_added set)
//!            ├──→ Error         (diagnostic set)
//! Running ───┼──→ NotFound
//!            └──→ Unauthorized
//! ```
//!
//! Terminal runs cannot transition again. `finished_at` is set exactly when
//! the run leaves `Running`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::diagnostics::sanitize_diagnostic;
use crate::sync_config::SyncConfigId;
use crate::{now_millis, Result, SyncError};

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
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

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Error,
    /// The source playlist does not exist for this user
    NotFound,
    /// No usable credential was available
    Unauthorized,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::NotFound => "not_found",
            RunStatus::Unauthorized => "unauthorized",
        }
    }
}

impl FromStr for RunStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            "not_found" => Ok(RunStatus::NotFound),
            "unauthorized" => Ok(RunStatus::Unauthorized),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Run Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub config_id: SyncConfigId,
    pub status: RunStatus,
    /// Unix milliseconds
    pub started_at: i64,
    pub finished_at: Option<i64>,
    /// Set only on `Success`
    pub tracks_added_count: Option<u32>,
    /// Redacted and truncated diagnostic
    pub error_message: Option<String>,
}

impl Run {
    /// Begin a new run for `config_id`
    pub fn start(config_id: SyncConfigId) -> Self {
        Self::start_at(config_id, now_millis())
    }

    /// Begin a new run whose start time, in Unix milliseconds, is `started_at`
    pub fn start_at(config_id: SyncConfigId, started_at: i64) -> Self {
        Self {
            id: RunId::new(),
            config_id,
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            tracks_added_count: None,
            error_message: None,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the run is already terminal
    pub fn succeed(mut self, tracks_added: u32) -> Result<Self> {
        self.finish(RunStatus::Success)?;
        self.tracks_added_count = Some(tracks_added);
        self.error_message = None;
        Ok(self)
    }

    /// Record a failure. `message` is redacted and truncated before it is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is already terminal
    pub fn fail(mut self, message: &str) -> Result<Self> {
        self.finish(RunStatus::Error)?;
        self.error_message = Some(sanitize_diagnostic(message));
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the run is already terminal
    pub fn not_found(mut self, message: &str) -> Result<Self> {
        self.finish(RunStatus::NotFound)?;
        self.error_message = Some(sanitize_diagnostic(message));
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the run is already terminal
    pub fn unauthorized(mut self, message: &str) -> Result<Self> {
        self.finish(RunStatus::Unauthorized)?;
        self.error_message = Some(sanitize_diagnostic(message));
        Ok(self)
    }

    /// Milliseconds between start and finish, once finished
    pub fn duration_millis(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Overwrite the finish time of a terminal run. Never earlier than the start.
    pub(crate) fn stamp_finished(&mut self, finished_at: i64) {
        if self.status.is_terminal() {
            self.finished_at = Some(finished_at.max(self.started_at));
        }
    }

    fn finish(&mut self, to: RunStatus) -> Result<()> {
        self.validate_transition(to)?;
        self.status = to;
        self.finished_at = Some(now_millis().max(self.started_at));
        Ok(())
    }

    fn validate_transition(&self, to: RunStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (RunStatus::Running, RunStatus::Running) => false,
            (RunStatus::Running, _) => true,
            // Terminal states cannot transition
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_from_string() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = RunId::from_string(uuid_str).unwrap();
        assert_eq!(id.as_str(), uuid_str);
        assert!(RunId::from_string("nope").is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Error,
            RunStatus::NotFound,
            RunStatus::Unauthorized,
        ] {
            assert_eq!(RunStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(RunStatus::from_str("completed").is_err());
    }

    #[test]
    fn test_new_run_is_running() {
        let run = Run::start(SyncConfigId::new());
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());
        assert!(run.tracks_added_count.is_none());
    }

    #[test]
    fn test_succeed_sets_count_and_finish() {
        let run = Run::start(SyncConfigId::new()).succeed(7).unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.tracks_added_count, Some(7));
        assert!(run.finished_at.unwrap() >= run.started_at);
        assert!(run.duration_millis().is_some());
    }

    #[test]
    fn test_fail_keeps_sanitized_message() {
        let run = Run::start(SyncConfigId::new())
            .fail(&format!("access_token=abc123 {}", "x".repeat(1000)))
            .unwrap();

        assert_eq!(run.status, RunStatus::Error);
        assert!(run.tracks_added_count.is_none());
        let message = run.error_message.unwrap();
        assert!(!message.contains("abc123"));
        assert_eq!(message.chars().count(), crate::diagnostics::MAX_ERROR_LEN);
    }

    #[test]
    fn test_terminal_runs_are_immutable() {
        let done = Run::start(SyncConfigId::new()).succeed(1).unwrap();
        assert!(matches!(
            done.clone().fail("later"),
            Err(SyncError::InvalidStateTransition { .. })
        ));
        assert!(done.clone().succeed(2).is_err());

        let missing = Run::start(SyncConfigId::new())
            .not_found("Discover Weekly playlist not found")
            .unwrap();
        assert!(missing.unauthorized("x").is_err());
    }
}
