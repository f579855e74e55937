//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playlist sync service:
//! - Settings construction and validation
//! - Logging and tracing setup with secret redaction
//!
//! ## Overview
//!
//! Every other crate receives its configuration as an explicit value built
//! here. Nothing in the workspace reads process-wide settings on its own.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{JobSettings, SyncSettings, SyncSettingsBuilder};
pub use error::{Error, Result};
pub use logging::{init_logging, redact_message, LogFormat, LoggingConfig};
