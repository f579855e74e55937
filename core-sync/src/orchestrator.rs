//! # Sync Orchestrator
//!
//! Runs one sync of a user's "Discover Weekly" into "Saved Weekly".
//!
//! ## Flow
//!
//! 1. Resolve (or create) the user's config and persist a `running` run
//! 2. Obtain a bearer token; none means the run ends `unauthorized`
//! 3. Walk the user's playlists until both are found by exact name. A
//!    missing source ends the run `not_found`; a missing destination is
//!    created. Both ids are saved on the config
//! 4. Collect the destination's item keys, then walk the source in order,
//!    selecting items that are neither local, already present, nor already
//!    selected, up to the cap
//! 5. Add the selection in batches (except in dry-run) and finish `success`
//!
//! Any error after the run is created finishes it as `error` with a redacted,
//! truncated diagnostic before the error is returned. Re-running with an
//! unchanged source and destination adds nothing.

use std::collections::HashSet;
use std::sync::Arc;

use bridge_traits::http::{HttpClient, RetryPolicy};
use core_auth::{TokenProvider, UserId};
use futures::{Stream, TryStreamExt};
use provider_spotify::{PlaylistTrackItem, SpotifyClient, SpotifyError, TrackRef};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::lock::ConfigLocks;
use crate::recorder::RunRecorder;
use crate::repository::ConfigStore;
use crate::run::{Run, RunId};
use crate::sync_config::{Strategy, SyncConfig, SyncConfigId};
use crate::{Result, SyncError};

/// Selection cap when the request does not set one
pub const DEFAULT_MAX_ITEMS: usize = 10_000;

/// Largest `max_items` a request may ask for
pub const MAX_REQUESTED_ITEMS: u32 = 500;

const NOT_AUTHENTICATED_MESSAGE: &str = "Not authenticated with Spotify";

/// Options for one sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Compute the selection without adding it to the destination
    pub dry_run: bool,
    /// Upper bound on items added by this run
    pub max_items: Option<u32>,
}

impl SyncRequest {
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] if `max_items` is outside
    /// `1..=500`.
    pub fn validate(&self) -> Result<()> {
        match self.max_items {
            Some(max) if max == 0 || max > MAX_REQUESTED_ITEMS => Err(SyncError::InvalidRequest(
                format!("max_items must be between 1 and {}", MAX_REQUESTED_ITEMS),
            )),
            _ => Ok(()),
        }
    }

    pub fn cap(&self) -> usize {
        self.max_items
            .map(|max| max as usize)
            .unwrap_or(DEFAULT_MAX_ITEMS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success { items_added: u32 },
    NotFound,
    Unauthorized,
}

/// Result of a sync whose run reached a non-error terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub config_id: SyncConfigId,
    pub run_id: RunId,
    pub outcome: SyncOutcome,
}

// ============================================================================
// Track Selection
// ============================================================================

/// Dedup key of a track: its id, or its uri when it has no id
pub fn dedup_key(track: &TrackRef) -> Option<&str> {
    track.id.as_deref().or(track.uri.as_deref())
}

/// Accumulates source items to add, in source order.
pub struct TrackSelector<'a> {
    existing: &'a HashSet<String>,
    seen: HashSet<String>,
    selected: Vec<String>,
    cap: usize,
}

impl<'a> TrackSelector<'a> {
    pub fn new(existing: &'a HashSet<String>, cap: usize) -> Self {
        Self {
            existing,
            seen: HashSet::new(),
            selected: Vec::new(),
            cap,
        }
    }

    /// Consider one source item. Returns `false` once the cap is reached.
    pub fn offer(&mut self, track: &TrackRef) -> bool {
        if self.is_full() {
            return false;
        }
        if track.is_local {
            return true;
        }

        let Some(key) = dedup_key(track) else {
            return true;
        };
        if self.existing.contains(key) || self.seen.contains(key) {
            return true;
        }

        let uri = match (&track.uri, &track.id) {
            (Some(uri), _) => uri.clone(),
            (None, Some(id)) => format!("spotify:track:{}", id),
            (None, None) => return true,
        };

        self.seen.insert(key.to_string());
        self.selected.push(uri);
        !self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.selected.len() >= self.cap
    }

    pub fn into_selected(self) -> Vec<String> {
        self.selected
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

enum Finish {
    Added(u32),
    NotFound(String),
    Unauthorized,
}

pub struct SyncOrchestrator {
    configs: Arc<dyn ConfigStore>,
    recorder: RunRecorder,
    tokens: Arc<dyn TokenProvider>,
    http_client: Arc<dyn HttpClient>,
    api_base_url: String,
    retry_policy: RetryPolicy,
    locks: ConfigLocks,
}

impl SyncOrchestrator {
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        recorder: RunRecorder,
        tokens: Arc<dyn TokenProvider>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            configs,
            recorder,
            tokens,
            http_client,
            api_base_url: provider_spotify::DEFAULT_API_BASE.to_string(),
            retry_policy: RetryPolicy::default(),
            locks: ConfigLocks::new(),
        }
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_locks(mut self, locks: ConfigLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Run one sync for `user_id`.
    ///
    /// # Errors
    ///
    /// Errors raised before the run exists (config resolution, run insert)
    /// are returned as is. Later errors are recorded on the run first,
    /// including a failure to save the outcome itself. Cancellation is
    /// recorded as `error` with message "cancelled" and returned as
    /// [`SyncError::Cancelled`].
    #[instrument(skip(self, user_id, cancel), fields(user_id = %user_id))]
    pub async fn sync(
        &self,
        user_id: UserId,
        request: SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let strategy = Strategy::DiscoverWeekly;
        let config = self.configs.get_or_create(&user_id, strategy).await?;
        let run = self.recorder.start(config.id).await?;
        let run_id = run.id;

        let _guard = self.locks.acquire(config.id).await;
        info!(run_id = %run_id, config_id = %config.id, dry_run = request.dry_run, "Sync started");

        let (recorded, outcome) = match self.execute(user_id, &config, request, cancel).await {
            Ok(Finish::Added(count)) => (
                self.recorder.succeed(run.clone(), count).await,
                SyncOutcome::Success { items_added: count },
            ),
            Ok(Finish::NotFound(message)) => (
                self.recorder.not_found(run.clone(), &message).await,
                SyncOutcome::NotFound,
            ),
            Ok(Finish::Unauthorized) => (
                self.recorder
                    .unauthorized(run.clone(), NOT_AUTHENTICATED_MESSAGE)
                    .await,
                SyncOutcome::Unauthorized,
            ),
            Err(e) => {
                let message = match &e {
                    SyncError::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                self.record_failure(run, &message).await;
                return Err(e);
            }
        };

        // The run must not stay `running` when its outcome could not be saved.
        if let Err(e) = recorded {
            warn!(error = %e, "Failed to record run outcome");
            self.record_failure(run, &e.to_string()).await;
            return Err(e);
        }

        Ok(SyncReport {
            config_id: config.id,
            run_id,
            outcome,
        })
    }

    async fn record_failure(&self, run: Run, message: &str) {
        if let Err(record_error) = self.recorder.fail(run, message).await {
            warn!(error = %record_error, "Failed to record run failure");
        }
    }

    async fn execute(
        &self,
        user_id: UserId,
        config: &SyncConfig,
        request: SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<Finish> {
        ensure_active(cancel)?;
        let Some(token) = self.tokens.get_valid_token(user_id).await? else {
            return Ok(Finish::Unauthorized);
        };

        let client = SpotifyClient::new(self.http_client.clone(), token)
            .with_base_url(self.api_base_url.as_str())
            .with_retry_policy(self.retry_policy.clone());
        let strategy = config.strategy;

        ensure_active(cancel)?;
        let (source, destination) = locate_playlists(&client, strategy).await?;
        let Some(source_id) = source else {
            return Ok(Finish::NotFound(format!(
                "{} playlist not found",
                strategy.source_name()
            )));
        };

        ensure_active(cancel)?;
        let destination_id = match destination {
            Some(id) => id,
            None => {
                debug!("Destination missing, creating it");
                let created = client
                    .create_playlist(strategy.destination_name(), false)
                    .await?;
                created.id.ok_or_else(|| {
                    SpotifyError::Parse("Created playlist missing id".to_string())
                })?
            }
        };

        self.configs
            .update_collections(&config.id, &source_id, &destination_id)
            .await?;

        ensure_active(cancel)?;
        let existing = existing_keys(client.playlist_items(&destination_id)).await?;

        ensure_active(cancel)?;
        let selected =
            select_new_items(client.playlist_items(&source_id), &existing, request.cap()).await?;
        info!(
            existing = existing.len(),
            selected = selected.len(),
            "Selection computed"
        );

        ensure_active(cancel)?;
        if !request.dry_run && !selected.is_empty() {
            client.add_items(&destination_id, &selected).await?;
        }

        let count = u32::try_from(selected.len()).unwrap_or(u32::MAX);
        Ok(Finish::Added(count))
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Find the source and destination playlists by exact (trimmed) name,
/// stopping as soon as both are known.
async fn locate_playlists(
    client: &SpotifyClient,
    strategy: Strategy,
) -> Result<(Option<String>, Option<String>)> {
    let mut playlists = client.my_playlists();
    let mut source = None;
    let mut destination = None;

    while let Some(playlist) = playlists.try_next().await? {
        let Some(id) = playlist.id.clone() else {
            continue;
        };
        let name = playlist.trimmed_name();
        if name == strategy.source_name() && source.is_none() {
            source = Some(id);
        } else if name == strategy.destination_name() && destination.is_none() {
            destination = Some(id);
        }
        if source.is_some() && destination.is_some() {
            break;
        }
    }

    Ok((source, destination))
}

async fn existing_keys<S>(mut items: S) -> Result<HashSet<String>>
where
    S: Stream<Item = provider_spotify::Result<PlaylistTrackItem>> + Unpin,
{
    let mut keys = HashSet::new();
    while let Some(item) = items.try_next().await? {
        if let Some(key) = item.track.as_ref().and_then(dedup_key) {
            keys.insert(key.to_string());
        }
    }
    Ok(keys)
}

async fn select_new_items<S>(
    mut items: S,
    existing: &HashSet<String>,
    cap: usize,
) -> Result<Vec<String>>
where
    S: Stream<Item = provider_spotify::Result<PlaylistTrackItem>> + Unpin,
{
    let mut selector = TrackSelector::new(existing, cap);
    while let Some(item) = items.try_next().await? {
        let Some(track) = item.track else {
            continue;
        };
        if !selector.offer(&track) {
            break;
        }
    }
    Ok(selector.into_selected())
}
