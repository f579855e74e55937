//! # Sync Service Configuration
//!
//! `SyncSettings` is constructed once at startup and handed to every component
//! that needs it. Nothing reads the environment after that point.
//!
//! ## Usage
//!
//! ### From the environment
//!
//! ```ignore
//! use core_runtime::config::SyncSettings;
//!
//! let settings = SyncSettings::from_env()?;
//! ```
//!
//! ### Explicit construction
//!
//! ```ignore
//! use core_runtime::config::SyncSettings;
//! use std::time::Duration;
//!
//! let settings = SyncSettings::builder()
//!     .database_url("sqlite://sync.db")
//!     .client_credentials("client-id", "client-secret")
//!     .request_timeout(Duration::from_secs(15))
//!     .workers(2)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! `build()` fails fast with an actionable message when a required value is
//! missing or malformed:
//!
//! ```should_panic
//! use core_runtime::config::SyncSettings;
//!
//! // Missing client credentials
//! let settings = SyncSettings::builder()
//!     .database_url("sqlite::memory:")
//!     .build()
//!     .expect("Should fail - missing client credentials");
//! ```

use crate::error::{Error, Result};
use crate::logging::{parse_log_level, LogFormat, LoggingConfig};
use bridge_traits::{http::RetryPolicy, time::LogLevel};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://playlist-sync.db?mode=rwc";

/// Background job pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    /// Number of concurrent workers pulling from the job queue
    pub workers: usize,
    /// Retries allowed per job after the first attempt
    pub max_retries: u32,
    /// Upper bound for the delay between job retries
    pub max_retry_delay: Duration,
    /// Capacity of the pending-job channel
    pub queue_capacity: usize,
    /// How long a finished job's status stays queryable
    pub finished_job_retention: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 5,
            max_retry_delay: Duration::from_secs(60),
            queue_capacity: 256,
            finished_job_retention: Duration::from_secs(60 * 60),
        }
    }
}

/// Fully validated runtime settings.
#[derive(Clone)]
pub struct SyncSettings {
    pub database_url: String,
    pub api_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Retry/backoff policy for remote API calls
    pub retry: RetryPolicy,
    /// Refresh credentials this long before they expire
    pub token_refresh_buffer: Duration,
    pub jobs: JobSettings,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSettings")
            .field("database_url", &self.database_url)
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("token_refresh_buffer", &self.token_refresh_buffer)
            .field("jobs", &self.jobs)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl SyncSettings {
    pub fn builder() -> SyncSettingsBuilder {
        SyncSettingsBuilder::default()
    }

    /// Read settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    ///
    /// Recognised keys: `DATABASE_URL`, `SPOTIFY_CLIENT_ID`,
    /// `SPOTIFY_CLIENT_SECRET`, `SPOTIFY_API_BASE_URL`, `SPOTIFY_TOKEN_URL`,
    /// `HTTP_TIMEOUT_SECS`, `SYNC_WORKERS`, `SYNC_MAX_RETRIES`, `LOG_LEVEL`,
    /// `LOG_FORMAT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(url) = get("DATABASE_URL") {
            builder = builder.database_url(url);
        }
        if let Some(id) = get("SPOTIFY_CLIENT_ID") {
            builder.client_id = Some(id);
        }
        if let Some(secret) = get("SPOTIFY_CLIENT_SECRET") {
            builder.client_secret = Some(secret);
        }
        if let Some(url) = get("SPOTIFY_API_BASE_URL") {
            builder = builder.api_base_url(url);
        }
        if let Some(url) = get("SPOTIFY_TOKEN_URL") {
            builder = builder.token_url(url);
        }
        if let Some(secs) = get("HTTP_TIMEOUT_SECS") {
            builder = builder.request_timeout(Duration::from_secs(parse_number(
                "HTTP_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(workers) = get("SYNC_WORKERS") {
            builder = builder.workers(parse_number("SYNC_WORKERS", &workers)? as usize);
        }
        if let Some(retries) = get("SYNC_MAX_RETRIES") {
            builder = builder.max_retries(parse_number("SYNC_MAX_RETRIES", &retries)? as u32);
        }
        if let Some(level) = get("LOG_LEVEL") {
            builder = builder.log_level(parse_log_level(&level)?);
        }
        if let Some(format) = get("LOG_FORMAT") {
            builder = builder.log_format(format.parse()?);
        }

        builder.build()
    }

    /// Logging configuration derived from these settings.
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.log_level)
            .with_format(self.log_format)
            .with_redaction(true)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}

/// Builder for [`SyncSettings`].
#[derive(Debug, Clone)]
pub struct SyncSettingsBuilder {
    database_url: Option<String>,
    api_base_url: String,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
    retry: RetryPolicy,
    token_refresh_buffer: Duration,
    jobs: JobSettings,
    log_level: LogLevel,
    log_format: LogFormat,
}

impl Default for SyncSettingsBuilder {
    fn default() -> Self {
        Self {
            database_url: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: None,
            client_secret: None,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            token_refresh_buffer: Duration::from_secs(60),
            jobs: JobSettings::default(),
            log_level: LogLevel::Info,
            log_format: LogFormat::default(),
        }
    }
}

impl SyncSettingsBuilder {
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn token_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.token_refresh_buffer = buffer;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.jobs.workers = workers;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.jobs.max_retries = retries;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.jobs.max_retry_delay = delay;
        self
    }

    pub fn finished_job_retention(mut self, retention: Duration) -> Self {
        self.jobs.finished_job_retention = retention;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Validate and produce the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if:
    /// - client id or secret is missing
    /// - a URL does not parse or is not http(s)
    /// - a timeout is zero
    /// - the worker count or retry attempt budget is zero
    pub fn build(self) -> Result<SyncSettings> {
        let client_id = self.client_id.ok_or_else(|| {
            Error::Config(
                "Spotify client id is required. Set SPOTIFY_CLIENT_ID or call \
                 client_credentials()."
                    .to_string(),
            )
        })?;
        let client_secret = self.client_secret.ok_or_else(|| {
            Error::Config(
                "Spotify client secret is required. Set SPOTIFY_CLIENT_SECRET or call \
                 client_credentials()."
                    .to_string(),
            )
        })?;

        let api_base_url = validate_http_url("api_base_url", &self.api_base_url)?;
        let token_url = validate_http_url("token_url", &self.token_url)?;

        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(Error::Config(
                "HTTP timeouts must be greater than zero".to_string(),
            ));
        }
        if self.jobs.workers == 0 {
            return Err(Error::Config("At least one sync worker is required".to_string()));
        }
        if self.jobs.queue_capacity == 0 {
            return Err(Error::Config("Job queue capacity must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "Retry policy must allow at least one attempt".to_string(),
            ));
        }

        Ok(SyncSettings {
            database_url: self
                .database_url
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            api_base_url,
            token_url,
            client_id,
            client_secret,
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            retry: self.retry,
            token_refresh_buffer: self.token_refresh_buffer,
            jobs: self.jobs,
            log_level: self.log_level,
            log_format: self.log_format,
        })
    }
}

fn validate_http_url(name: &str, raw: &str) -> Result<String> {
    let parsed =
        Url::parse(raw).map_err(|e| Error::Config(format!("Invalid {}: {} ({})", name, raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{} must use http or https, got {}",
            name,
            parsed.scheme()
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}
