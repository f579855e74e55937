//! # Sync Store Module
//!
//! Owns the SQLite database that backs users, credentials, sync
//! configurations and run history.
//!
//! ## Overview
//!
//! This crate manages:
//! - Connection pooling with WAL mode and enforced foreign keys
//! - Embedded schema migrations (`migrations/`)
//! - An in-memory pool for tests
//!
//! Repositories live next to the domain types that use them (`core-auth`,
//! `core-sync`); this crate only hands out a ready, migrated pool.

pub mod db;
pub mod error;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use sqlx::SqlitePool;
