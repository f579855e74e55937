//! Error types for the Spotify Web API client

use std::time::Duration;

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Spotify client errors
#[derive(Error, Debug)]
pub enum SpotifyError {
    /// Timeouts or connection failures outlasted the attempt budget
    #[error("Spotify request failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// 429 responses outlasted the rate-limit waiting budget
    #[error("Rate limited by Spotify, gave up after waiting {}s", .waited.as_secs())]
    RateLimited { waited: Duration },

    /// 5xx responses outlasted the attempt budget
    #[error("Spotify server error (status {status_code}) after {attempts} attempts")]
    RemoteServer { status_code: u16, attempts: u32 },

    /// Any other non-success status for an operation
    #[error("Spotify API error (status {status_code}) during {operation}")]
    RemoteClient { status_code: u16, operation: String },

    /// Pagination did not terminate within the page ceiling
    #[error("Paging guard tripped for {operation} after {pages} pages")]
    PagingGuardTripped { operation: String, pages: u32 },

    /// Some add batches were applied before one failed
    #[error("Add aborted after {applied_batches} of {total_batches} batches: {source}")]
    PartialApply {
        applied_batches: usize,
        total_batches: usize,
        #[source]
        source: Box<SpotifyError>,
    },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    Parse(String),

    /// Bridge error
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SpotifyError {
    /// Whether a later attempt of the whole operation may succeed.
    ///
    /// Client errors and a tripped paging guard are permanent. Parse and
    /// bridge failures are unclassified and count as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            SpotifyError::Transport { .. }
            | SpotifyError::RateLimited { .. }
            | SpotifyError::RemoteServer { .. }
            | SpotifyError::Parse(_)
            | SpotifyError::Bridge(_) => true,
            SpotifyError::RemoteClient { .. } | SpotifyError::PagingGuardTripped { .. } => false,
            SpotifyError::PartialApply { source, .. } => source.is_transient(),
        }
    }

    /// HTTP status behind the error, if one was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SpotifyError::RateLimited { .. } => Some(429),
            SpotifyError::RemoteServer { status_code, .. }
            | SpotifyError::RemoteClient { status_code, .. } => Some(*status_code),
            SpotifyError::PartialApply { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

/// Result type for Spotify operations
pub type Result<T> = std::result::Result<T, SpotifyError>;
