//! # Token Provider
//!
//! Hands out a currently-valid bearer token for a user, refreshing and
//! persisting the stored credential when it is within the refresh buffer of
//! expiry.
//!
//! Concurrent callers for the same user share one refresh: a per-user lock
//! serializes the load/refresh/save sequence so a rotated refresh token is
//! never used twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::time::Clock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::oauth::OAuthClient;
use crate::store::CredentialStore;
use crate::types::UserId;

/// Default buffer before expiry at which a token is refreshed (60 seconds)
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);

/// Source of bearer tokens for remote API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a usable access token for `user_id`.
    ///
    /// `Ok(None)` means the user has no usable credential: nothing is stored,
    /// or the refresh grant was rejected. Callers treat this as
    /// "unauthorized", not as a failure to retry. An unreachable token
    /// endpoint is returned as an error instead.
    async fn get_valid_token(&self, user_id: UserId) -> Result<Option<String>>;
}

/// [`TokenProvider`] backed by a [`CredentialStore`] and an [`OAuthClient`].
pub struct RefreshingTokenProvider {
    store: Arc<dyn CredentialStore>,
    oauth: OAuthClient,
    clock: Arc<dyn Clock>,
    refresh_buffer: Duration,
    refresh_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl RefreshingTokenProvider {
    pub fn new(store: Arc<dyn CredentialStore>, oauth: OAuthClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            oauth,
            clock,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Per-user refresh lock. Entries nobody holds or waits on are dropped.
    async fn lock_for(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl TokenProvider for RefreshingTokenProvider {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_valid_token(&self, user_id: UserId) -> Result<Option<String>> {
        let refresh_lock = self.lock_for(user_id).await;
        let _guard = refresh_lock.lock().await;

        let Some(credential) = self.store.load(&user_id).await? else {
            debug!("No stored credential");
            return Ok(None);
        };

        let buffer = chrono::Duration::from_std(self.refresh_buffer)
            .map_err(|e| AuthError::TokenRefreshFailed(format!("Invalid refresh buffer: {}", e)))?;

        if !credential.needs_refresh(self.clock.now(), buffer) {
            debug!("Token is valid, no refresh needed");
            return Ok(Some(credential.access_token));
        }

        info!(expires_at = %credential.expires_at, "Token expired or expiring soon, refreshing");

        let refreshed = match self.oauth.refresh(&credential.refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(AuthError::TokenRefreshFailed(reason)) => {
                warn!(reason = %reason, "Token refresh failed");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Token endpoint unreachable");
                return Err(e);
            }
        };

        self.store.save(&user_id, &refreshed).await?;
        info!(expires_at = %refreshed.expires_at, "Token refreshed");

        Ok(Some(refreshed.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::OAuthConfig;
    use crate::types::AccessCredential;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use bridge_traits::time::SystemClock;
    use chrono::Utc;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        credentials: std::sync::Mutex<HashMap<UserId, AccessCredential>>,
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self, user_id: &UserId) -> Result<Option<AccessCredential>> {
            Ok(self.credentials.lock().unwrap().get(user_id).cloned())
        }

        async fn save(&self, user_id: &UserId, credential: &AccessCredential) -> Result<()> {
            self.credentials
                .lock()
                .unwrap()
                .insert(*user_id, credential.clone());
            Ok(())
        }
    }

    fn provider(store: Arc<MemoryStore>, http: MockHttpClient) -> RefreshingTokenProvider {
        let oauth = OAuthClient::new(
            OAuthConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                token_url: "https://accounts.example.com/api/token".to_string(),
            },
            Arc::new(http),
            Arc::new(SystemClock),
        );
        RefreshingTokenProvider::new(store, oauth, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_missing_credential_returns_none() {
        let mut http = MockHttpClient::new();
        http.expect_execute().never();

        let provider = provider(Arc::new(MemoryStore::default()), http);
        assert_eq!(provider.get_valid_token(UserId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fresh_token_is_returned_without_refresh() {
        let store = Arc::new(MemoryStore::default());
        let user_id = UserId::new();
        store
            .save(
                &user_id,
                &AccessCredential::new("current", "r", Utc::now() + chrono::Duration::minutes(10)),
            )
            .await
            .unwrap();

        let mut http = MockHttpClient::new();
        http.expect_execute().never();

        let provider = provider(store, http);
        assert_eq!(
            provider.get_valid_token(user_id).await.unwrap().as_deref(),
            Some("current")
        );
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let store = Arc::new(MemoryStore::default());
        let user_id = UserId::new();
        store
            .save(
                &user_id,
                &AccessCredential::new("stale", "r1", Utc::now() + chrono::Duration::seconds(30)),
            )
            .await
            .unwrap();

        let mut http = MockHttpClient::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(HttpResponse::new(
                200,
                r#"{"access_token":"fresh","expires_in":3600}"#,
            ))
        });

        let provider = provider(store.clone(), http);
        let token = provider.get_valid_token(user_id).await.unwrap();
        assert_eq!(token.as_deref(), Some("fresh"));

        let saved = store.load(&user_id).await.unwrap().unwrap();
        assert_eq!(saved.access_token, "fresh");
        assert_eq!(saved.refresh_token, "r1");
        assert!(saved.expires_at > Utc::now() + chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_rejected_refresh_returns_none() {
        let store = Arc::new(MemoryStore::default());
        let user_id = UserId::new();
        store
            .save(&user_id, &AccessCredential::new("stale", "revoked", Utc::now()))
            .await
            .unwrap();

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(400, r#"{"error":"invalid_grant"}"#)));

        let provider = provider(store.clone(), http);
        assert_eq!(provider.get_valid_token(user_id).await.unwrap(), None);

        // the stored credential is left untouched
        let saved = store.load(&user_id).await.unwrap().unwrap();
        assert_eq!(saved.access_token, "stale");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let store = Arc::new(MemoryStore::default());
        let user_id = UserId::new();
        store
            .save(&user_id, &AccessCredential::new("stale", "r", Utc::now()))
            .await
            .unwrap();

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"access_token":"fresh"}"#)));

        let provider = Arc::new(provider(store, http));
        let (a, b) = tokio::join!(
            provider.get_valid_token(user_id),
            provider.get_valid_token(user_id)
        );

        assert_eq!(a.unwrap().as_deref(), Some("fresh"));
        assert_eq!(b.unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_token_endpoint_is_an_error() {
        let store = Arc::new(MemoryStore::default());
        let user_id = UserId::new();
        store
            .save(&user_id, &AccessCredential::new("stale", "r", Utc::now()))
            .await
            .unwrap();

        let mut http = MockHttpClient::new();
        http.expect_execute().times(3).returning(|_| {
            Err(bridge_traits::BridgeError::ConnectionFailed(
                "connection refused".to_string(),
            ))
        });

        let provider = provider(store.clone(), http);
        let result = provider.get_valid_token(user_id).await;
        assert!(matches!(
            result,
            Err(AuthError::TokenEndpointUnavailable { attempts: 3, .. })
        ));

        let saved = store.load(&user_id).await.unwrap().unwrap();
        assert_eq!(saved.access_token, "stale");
    }

    #[tokio::test]
    async fn test_idle_refresh_locks_are_dropped() {
        let mut http = MockHttpClient::new();
        http.expect_execute().never();
        let provider = provider(Arc::new(MemoryStore::default()), http);

        for _ in 0..5 {
            provider.get_valid_token(UserId::new()).await.unwrap();
        }

        assert_eq!(provider.refresh_locks.lock().await.len(), 1);
    }
}
