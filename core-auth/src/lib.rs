//! # Authentication Module
//!
//! Users, their stored renewable credentials, and the token provider the
//! sync engine asks for bearer tokens.
//!
//! ## Overview
//!
//! The login handshake that first establishes a credential lives in the host
//! application. This crate takes over from there: it persists the credential,
//! refreshes it shortly before expiry with a refresh-token grant, and never
//! exposes token material beyond [`TokenProvider::get_valid_token`].
//!
//! ## Features
//!
//! - SQLite-backed user and credential repositories
//! - Refresh-token grant with bounded retry on transient failures
//! - Per-user refresh serialization
//! - Token-redacting `Debug` implementations

pub mod error;
pub mod oauth;
pub mod provider;
pub mod store;
pub mod types;
pub mod users;

pub use error::{AuthError, Result};
pub use oauth::{OAuthClient, OAuthConfig};
pub use provider::{RefreshingTokenProvider, TokenProvider, DEFAULT_REFRESH_BUFFER};
pub use store::{CredentialStore, SqliteCredentialStore};
pub use types::{AccessCredential, UserId};
pub use users::{SqliteUserRepository, User, UserRepository};
