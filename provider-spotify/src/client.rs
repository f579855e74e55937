//! Resilient Spotify Web API client
//!
//! Wraps the host [`HttpClient`] with the retry rules every Spotify call
//! shares:
//!
//! - timeouts, connection failures and 5xx responses are retried with
//!   exponential backoff plus jitter, up to `max_attempts` tries;
//! - 429 responses wait for the clamped `Retry-After` delay and do not use
//!   up attempts, but the total time spent waiting on them is capped by
//!   `rate_limit_budget`;
//! - every other status is handed back to the caller untouched.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::backoff::{backoff_delay, retry_after_delay};
use crate::error::{Result, SpotifyError};
use crate::types::Paging;

/// Spotify Web API base URL
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// Items requested per page (Spotify's maximum for these listings)
pub const PAGE_SIZE: u32 = 50;

/// Spotify Web API client bound to one user's access token
///
/// # Example
///
/// ```ignore
/// use provider_spotify::SpotifyClient;
/// use futures::TryStreamExt;
///
/// let client = SpotifyClient::new(http_client, access_token);
/// let playlists: Vec<_> = client.my_playlists().try_collect().await?;
/// ```
pub struct SpotifyClient {
    http_client: Arc<dyn HttpClient>,
    access_token: String,
    base_url: String,
    policy: RetryPolicy,
}

struct PageCursor {
    offset: Option<u32>,
    pages: u32,
}

impl SpotifyClient {
    pub fn new(http_client: Arc<dyn HttpClient>, access_token: impl Into<String>) -> Self {
        Self {
            http_client,
            access_token: access_token.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<HttpRequest> {
        let mut request = HttpRequest::new(method, url)
            .bearer_token(self.access_token.as_str())
            .header("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body)?;
        }
        Ok(request)
    }

    /// Execute one logical API call, retrying as described in the module docs.
    ///
    /// `path` is appended to the base URL unless it is already absolute.
    ///
    /// # Errors
    ///
    /// - [`SpotifyError::Transport`] when transport failures exhaust the attempts
    /// - [`SpotifyError::RemoteServer`] when 5xx responses exhaust the attempts
    /// - [`SpotifyError::RateLimited`] when 429 waits would exceed the budget
    #[instrument(skip(self, query, body))]
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        let url = self.url_for(path);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures = 0u32;
        let mut rate_limited_for = Duration::ZERO;

        loop {
            let request = self.build_request(method, &url, query, body)?;

            match self.http_client.execute(request).await {
                Ok(response) if response.is_rate_limited() => {
                    let delay = retry_after_delay(&self.policy, &response);
                    if rate_limited_for + delay > self.policy.rate_limit_budget {
                        warn!(
                            waited_secs = rate_limited_for.as_secs(),
                            "Rate limit budget exhausted"
                        );
                        return Err(SpotifyError::RateLimited {
                            waited: rate_limited_for,
                        });
                    }

                    warn!(delay_ms = delay.as_millis() as u64, "Rate limited, waiting");
                    sleep(delay).await;
                    rate_limited_for += delay;
                }
                Ok(response) if response.is_server_error() => {
                    failures += 1;
                    if failures >= max_attempts {
                        warn!(
                            status = response.status,
                            attempts = failures,
                            "Server errors exhausted retries"
                        );
                        return Err(SpotifyError::RemoteServer {
                            status_code: response.status,
                            attempts: failures,
                        });
                    }

                    let delay = backoff_delay(&self.policy, failures);
                    warn!(
                        status = response.status,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Server error, retrying"
                    );
                    sleep(delay).await;
                }
                Ok(response) => {
                    debug!(status = response.status, "Request completed");
                    return Ok(response);
                }
                Err(e) if e.is_transport() => {
                    failures += 1;
                    if failures >= max_attempts {
                        warn!(error = %e, attempts = failures, "Transport failures exhausted retries");
                        return Err(SpotifyError::Transport {
                            attempts: failures,
                            message: e.to_string(),
                        });
                    }

                    let delay = backoff_delay(&self.policy, failures);
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(SpotifyError::Bridge(e)),
            }
        }
    }

    /// Lazily walk an offset/limit listing, yielding items in server order.
    ///
    /// Pages are fetched on demand with `limit`/`offset` prepended to
    /// `params`. A page with a non-null `next` is followed by the page at
    /// `offset + limit`. Fetching more than `max_pages` pages fails with
    /// [`SpotifyError::PagingGuardTripped`]; a non-success status fails with
    /// [`SpotifyError::RemoteClient`] naming `operation`.
    pub fn paginate<T>(
        &self,
        path: impl Into<String>,
        params: Vec<(String, String)>,
        max_pages: u32,
        operation: &'static str,
    ) -> BoxStream<'_, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = path.into();
        let start = PageCursor {
            offset: Some(0),
            pages: 0,
        };

        stream::try_unfold(start, move |cursor| {
            let path = path.clone();
            let params = params.clone();
            async move {
                let Some(offset) = cursor.offset else {
                    return Ok(None);
                };
                if cursor.pages >= max_pages {
                    warn!(operation, pages = cursor.pages, "Paging guard tripped");
                    return Err(SpotifyError::PagingGuardTripped {
                        operation: operation.to_string(),
                        pages: cursor.pages,
                    });
                }

                let mut query = vec![
                    ("limit".to_string(), PAGE_SIZE.to_string()),
                    ("offset".to_string(), offset.to_string()),
                ];
                query.extend(params);

                let response = self.request(HttpMethod::Get, &path, &query, None).await?;
                if !response.is_success() {
                    return Err(SpotifyError::RemoteClient {
                        status_code: response.status,
                        operation: operation.to_string(),
                    });
                }

                let page: Paging<T> = response
                    .json()
                    .map_err(|e| SpotifyError::Parse(e.to_string()))?;
                let next_offset = page.next.as_ref().map(|_| {
                    page.offset
                        .unwrap_or(offset)
                        .saturating_add(page.limit.unwrap_or(PAGE_SIZE))
                });

                debug!(
                    operation,
                    page = cursor.pages + 1,
                    items = page.items.len(),
                    has_next = next_offset.is_some(),
                    "Fetched page"
                );

                Ok(Some((
                    page.items,
                    PageCursor {
                        offset: next_offset,
                        pages: cursor.pages + 1,
                    },
                )))
            }
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}
