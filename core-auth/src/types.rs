use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AuthError, Result};

/// Unique identifier for a user of the sync service.
///
/// This is the local identity; the remote account id is stored separately
/// on [`User`](crate::users::User).
///
/// # Examples
///
/// ```
/// use core_auth::UserId;
///
/// let user_id = UserId::new();
/// let parsed = UserId::from_string(&user_id.to_string()).unwrap();
/// assert_eq!(user_id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a new random user ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a user ID from a string
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidUserId`] if the string is not a UUID.
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| AuthError::InvalidUserId(format!("{}: {}", s, e)))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Renewable bearer credential for one user.
///
/// # Security
///
/// Tokens must never be logged or returned to callers outside the token
/// provider. The `Debug` implementation redacts them.
///
/// # Examples
///
/// ```
/// use core_auth::AccessCredential;
/// use chrono::{Duration, Utc};
///
/// let credential = AccessCredential::new("BQD...", "AQB...", Utc::now() + Duration::minutes(10));
/// assert!(!credential.needs_refresh(Utc::now(), Duration::seconds(60)));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token stops being accepted (UTC)
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

impl AccessCredential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// True when the token is expired or will expire within `buffer` of `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now + buffer >= self.expires_at
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}
