//! # Spotify Provider
//!
//! Resilient client for the parts of the Spotify Web API the sync engine
//! needs.
//!
//! ## Overview
//!
//! This module provides:
//! - Retry with exponential backoff and jitter for transport and 5xx failures
//! - `Retry-After` handling for 429 responses under a waiting budget
//! - Lazy offset/limit pagination with a page ceiling
//! - Batched, ordered playlist additions

pub mod api;
pub mod backoff;
pub mod client;
pub mod error;
pub mod types;

pub use api::{MAX_ITEMS_PER_ADD, PLAYLIST_PAGE_GUARD, TRACK_PAGE_GUARD};
pub use client::{SpotifyClient, DEFAULT_API_BASE, PAGE_SIZE};
pub use error::{Result, SpotifyError};
pub use types::{Paging, PlaylistTrackItem, SimplifiedPlaylist, TrackRef};
