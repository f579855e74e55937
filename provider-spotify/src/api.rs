//! Playlist operations used by the sync engine

use bridge_traits::http::HttpMethod;
use futures::stream::BoxStream;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::client::SpotifyClient;
use crate::error::{Result, SpotifyError};
use crate::types::{PlaylistTrackItem, SimplifiedPlaylist};

/// Page ceiling when listing the user's playlists
pub const PLAYLIST_PAGE_GUARD: u32 = 3000;

/// Page ceiling when listing a playlist's items
pub const TRACK_PAGE_GUARD: u32 = 5000;

/// Spotify's limit on URIs per add call
pub const MAX_ITEMS_PER_ADD: usize = 100;

const PLAYLIST_ITEM_FIELDS: &str = "items(track(id,uri,is_local)),next,offset,limit,total";

impl SpotifyClient {
    /// Playlists owned or followed by the current user, in Spotify's order.
    pub fn my_playlists(&self) -> BoxStream<'_, Result<SimplifiedPlaylist>> {
        self.paginate(
            "/me/playlists",
            Vec::new(),
            PLAYLIST_PAGE_GUARD,
            "list playlists",
        )
    }

    /// Items of `playlist_id`, in playlist order.
    pub fn playlist_items(&self, playlist_id: &str) -> BoxStream<'_, Result<PlaylistTrackItem>> {
        self.paginate(
            format!("/playlists/{}/tracks", playlist_id),
            vec![("fields".to_string(), PLAYLIST_ITEM_FIELDS.to_string())],
            TRACK_PAGE_GUARD,
            "list playlist items",
        )
    }

    /// Create a playlist for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`SpotifyError::RemoteClient`] unless Spotify answers 200 or
    /// 201, and [`SpotifyError::Parse`] if the created playlist has no id.
    #[instrument(skip(self))]
    pub async fn create_playlist(&self, name: &str, public: bool) -> Result<SimplifiedPlaylist> {
        let body = json!({ "name": name, "public": public });
        let response = self
            .request(HttpMethod::Post, "/me/playlists", &[], Some(&body))
            .await?;

        if !matches!(response.status, 200 | 201) {
            warn!(status = response.status, "Playlist creation rejected");
            return Err(SpotifyError::RemoteClient {
                status_code: response.status,
                operation: "create playlist".to_string(),
            });
        }

        let playlist: SimplifiedPlaylist = response
            .json()
            .map_err(|e| SpotifyError::Parse(e.to_string()))?;
        if playlist.id.is_none() {
            return Err(SpotifyError::Parse("Created playlist missing id".to_string()));
        }

        info!(playlist_id = ?playlist.id, "Created playlist");
        Ok(playlist)
    }

    /// Append `uris` to `playlist_id` in batches of [`MAX_ITEMS_PER_ADD`],
    /// preserving order. Returns the number of batches sent.
    ///
    /// # Errors
    ///
    /// The first failing batch aborts the rest. If earlier batches were
    /// already applied the failure is wrapped in
    /// [`SpotifyError::PartialApply`].
    #[instrument(skip(self, uris), fields(items = uris.len()))]
    pub async fn add_items(&self, playlist_id: &str, uris: &[String]) -> Result<usize> {
        let path = format!("/playlists/{}/tracks", playlist_id);
        let total_batches = uris.len().div_ceil(MAX_ITEMS_PER_ADD);

        for (index, batch) in uris.chunks(MAX_ITEMS_PER_ADD).enumerate() {
            let body = json!({ "uris": batch });
            let outcome = match self.request(HttpMethod::Post, &path, &[], Some(&body)).await {
                Ok(response) if matches!(response.status, 200 | 201) => Ok(()),
                Ok(response) => Err(SpotifyError::RemoteClient {
                    status_code: response.status,
                    operation: "add items".to_string(),
                }),
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                warn!(
                    applied_batches = index,
                    total_batches,
                    error = %e,
                    "Adding items aborted"
                );
                if index == 0 {
                    return Err(e);
                }
                return Err(SpotifyError::PartialApply {
                    applied_batches: index,
                    total_batches,
                    source: Box::new(e),
                });
            }

            debug!(batch = index + 1, total_batches, size = batch.len(), "Batch added");
        }

        Ok(total_batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use futures::TryStreamExt;
    use mockall::mock;
    use std::sync::{Arc, Mutex};

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn uris(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("spotify:track:{}", i)).collect()
    }

    fn batch_len(request: &HttpRequest) -> usize {
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
        body["uris"].as_array().map(Vec::len).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_add_items_batches_in_hundreds() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let recorded = sizes.clone();

        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(3)
            .withf(|request| {
                request.method == HttpMethod::Post
                    && request.url == "https://api.spotify.com/v1/playlists/dest/tracks"
            })
            .returning(move |request| {
                recorded.lock().unwrap().push(batch_len(&request));
                Ok(HttpResponse::new(201, r#"{"snapshot_id":"s"}"#))
            });

        let client = SpotifyClient::new(Arc::new(mock), "token");
        let batches = client.add_items("dest", &uris(205)).await.unwrap();

        assert_eq!(batches, 3);
        assert_eq!(*sizes.lock().unwrap(), vec![100, 100, 5]);
    }

    #[tokio::test]
    async fn test_add_items_preserves_order() {
        let first_uris = Arc::new(Mutex::new(Vec::new()));
        let recorded = first_uris.clone();

        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(2).returning(move |request| {
            let body: serde_json::Value =
                serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
            recorded
                .lock()
                .unwrap()
                .push(body["uris"][0].as_str().unwrap_or_default().to_string());
            Ok(HttpResponse::new(201, "{}"))
        });

        let client = SpotifyClient::new(Arc::new(mock), "token");
        client.add_items("dest", &uris(150)).await.unwrap();

        assert_eq!(
            *first_uris.lock().unwrap(),
            vec!["spotify:track:0".to_string(), "spotify:track:100".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_items_partial_failure_is_reported() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(201, "{}")));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(403, "{}")));

        let client = SpotifyClient::new(Arc::new(mock), "token");
        let err = client.add_items("dest", &uris(250)).await.unwrap_err();

        match err {
            SpotifyError::PartialApply {
                applied_batches,
                total_batches,
                source,
            } => {
                assert_eq!(applied_batches, 1);
                assert_eq!(total_batches, 3);
                assert_eq!(source.status_code(), Some(403));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_items_first_batch_failure_is_unwrapped() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(403, "{}")));

        let client = SpotifyClient::new(Arc::new(mock), "token");
        let err = client.add_items("dest", &uris(10)).await.unwrap_err();

        assert!(matches!(
            err,
            SpotifyError::RemoteClient {
                status_code: 403,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_add_no_items_sends_nothing() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().never();

        let client = SpotifyClient::new(Arc::new(mock), "token");
        assert_eq!(client.add_items("dest", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_playlist() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .withf(|request| {
                let body: serde_json::Value =
                    serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
                request.url.ends_with("/me/playlists")
                    && body["name"] == "Saved Weekly"
                    && body["public"] == false
            })
            .returning(|_| {
                Ok(HttpResponse::new(
                    201,
                    r#"{"id":"new-id","name":"Saved Weekly"}"#,
                ))
            });

        let client = SpotifyClient::new(Arc::new(mock), "token");
        let playlist = client.create_playlist("Saved Weekly", false).await.unwrap();
        assert_eq!(playlist.id.as_deref(), Some("new-id"));
    }

    #[tokio::test]
    async fn test_create_playlist_without_id_fails() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(201, r#"{"name":"Saved Weekly"}"#)));

        let client = SpotifyClient::new(Arc::new(mock), "token");
        let err = client.create_playlist("Saved Weekly", false).await.unwrap_err();
        assert!(matches!(err, SpotifyError::Parse(_)));
    }

    #[tokio::test]
    async fn test_playlist_items_requests_fields() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .withf(|request| {
                request.url == "https://api.spotify.com/v1/playlists/src/tracks"
                    && request.query.contains(&(
                        "fields".to_string(),
                        PLAYLIST_ITEM_FIELDS.to_string(),
                    ))
                    && request.query.contains(&("limit".to_string(), "50".to_string()))
            })
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"items":[{"track":{"id":"a","uri":"spotify:track:a","is_local":false}}],"next":null}"#,
                ))
            });

        let client = SpotifyClient::new(Arc::new(mock), "token");
        let items: Vec<PlaylistTrackItem> =
            client.playlist_items("src").try_collect().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].track.as_ref().unwrap().id.as_deref(), Some("a"));
    }
}
