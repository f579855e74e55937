//! Spotify Web API response types
//!
//! Only the fields the sync engine reads are modeled. Everything else in the
//! payloads is ignored.

use serde::Deserialize;

/// One page of an offset/limit listing
#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// URL of the next page; `None` on the last page
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub total: Option<u32>,
}

/// Playlist entry from `GET /me/playlists`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimplifiedPlaylist {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl SimplifiedPlaylist {
    /// Name with surrounding whitespace removed, empty when absent
    pub fn trimmed_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default().trim()
    }
}

/// Entry from `GET /playlists/{id}/tracks`. `track` is null for removed or
/// unavailable items.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaylistTrackItem {
    #[serde(default)]
    pub track: Option<TrackRef>,
}

/// The parts of a track needed to deduplicate and re-add it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub is_local: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_page() {
        let json = r#"{
            "items": [
                {"track": {"id": "a", "uri": "spotify:track:a", "is_local": false}},
                {"track": null},
                {"track": {"id": null, "uri": "spotify:local:x", "is_local": true}}
            ],
            "next": null,
            "offset": 0,
            "limit": 50,
            "total": 3
        }"#;

        let page: Paging<PlaylistTrackItem> = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.items[1].track.is_none());
        assert!(page.items[2].track.as_ref().unwrap().is_local);
        assert!(page.next.is_none());
    }

    #[test]
    fn test_missing_items_defaults_to_empty() {
        let page: Paging<SimplifiedPlaylist> = serde_json::from_str(r#"{"next": null}"#).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_trimmed_name() {
        let playlist = SimplifiedPlaylist {
            id: Some("p".to_string()),
            name: Some("  Discover Weekly ".to_string()),
        };
        assert_eq!(playlist.trimmed_name(), "Discover Weekly");
    }
}
