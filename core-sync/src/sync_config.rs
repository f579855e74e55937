//! # Sync Configuration
//!
//! One record per (user, strategy kind) describing what to copy where. The
//! collection ids stay empty until the first run resolves them by name.

use core_auth::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, SyncError};

/// Unique identifier for a sync configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncConfigId(Uuid);

impl SyncConfigId {
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

impl Default for SyncConfigId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncConfigId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// What a sync copies. Stored as tagged JSON so new kinds can carry their
/// own parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Copy new tracks from "Discover Weekly" into "Saved Weekly"
    DiscoverWeekly,
}

impl Strategy {
    /// Discriminator stored in `sync_configs.strategy_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::DiscoverWeekly => "discover_weekly",
        }
    }

    /// Exact name of the playlist items are copied from
    pub fn source_name(&self) -> &'static str {
        match self {
            Strategy::DiscoverWeekly => "Discover Weekly",
        }
    }

    /// Exact name of the playlist items are copied into
    pub fn destination_name(&self) -> &'static str {
        match self {
            Strategy::DiscoverWeekly => "Saved Weekly",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SyncError::Database(format!("Failed to encode strategy: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Database(format!("Failed to decode strategy {}: {}", json, e)))
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// Persisted sync configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub id: SyncConfigId,
    pub user_id: UserId,
    pub strategy: Strategy,
    pub source_collection_id: Option<String>,
    pub destination_collection_id: Option<String>,
    pub is_enabled: bool,
    /// Unix milliseconds
    pub created_at: i64,
}

impl SyncConfig {
    pub fn new(user_id: UserId, strategy: Strategy) -> Self {
        Self {
            id: SyncConfigId::new(),
            user_id,
            strategy,
            source_collection_id: None,
            destination_collection_id: None,
            is_enabled: true,
            created_at: crate::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_json_is_tagged() {
        let json = Strategy::DiscoverWeekly.to_json().unwrap();
        assert_eq!(json, r#"{"kind":"discover_weekly"}"#);
        assert_eq!(Strategy::from_json(&json).unwrap(), Strategy::DiscoverWeekly);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(Strategy::from_json(r#"{"kind":"release_radar"}"#).is_err());
    }

    #[test]
    fn test_discover_weekly_names() {
        assert_eq!(Strategy::DiscoverWeekly.source_name(), "Discover Weekly");
        assert_eq!(Strategy::DiscoverWeekly.destination_name(), "Saved Weekly");
        assert_eq!(Strategy::DiscoverWeekly.kind(), "discover_weekly");
    }

    #[test]
    fn test_new_config_is_unresolved() {
        let config = SyncConfig::new(UserId::new(), Strategy::DiscoverWeekly);
        assert!(config.source_collection_id.is_none());
        assert!(config.destination_collection_id.is_none());
        assert!(config.is_enabled);
    }
}
