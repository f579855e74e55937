//! # OAuth Token Refresh
//!
//! Exchanges a stored refresh token for a fresh access token at the
//! provider's token endpoint (RFC 6749 section 6).
//!
//! The request authenticates the application with HTTP Basic credentials
//! built from the client id and secret, and sends
//! `grant_type=refresh_token` as a form body. Providers may omit a new
//! refresh token or the lifetime from the response; the previous refresh
//! token and a one hour lifetime are assumed in that case.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use bridge_traits::{
    http::{HttpClient, HttpMethod, HttpRequest},
    time::Clock,
};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::error::{AuthError, Result};
use crate::types::AccessCredential;

const MAX_ATTEMPTS: u32 = 3;

/// Application credentials and endpoint for the refresh exchange.
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[derive(Serialize)]
struct RefreshForm<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

/// Token response from the OAuth provider.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// Performs refresh-token grants against the configured token endpoint.
pub struct OAuthClient {
    config: OAuthConfig,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            http_client,
            clock,
        }
    }

    fn basic_authorization(&self) -> String {
        let raw = format!("{}:{}", self.config.client_id, self.config.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }

    /// Exchange `refresh_token` for a new credential.
    ///
    /// Transport failures and 5xx responses are retried up to three attempts
    /// with a short doubling delay. A 4xx response (revoked or invalid grant)
    /// fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenRefreshFailed`] when the endpoint rejects the
    /// grant or answers with an unreadable body, and
    /// [`AuthError::TokenEndpointUnavailable`] when every attempt failed in
    /// transport or with a 5xx.
    #[instrument(skip(self, refresh_token), fields(token_url = %self.config.token_url))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential> {
        let form = RefreshForm {
            grant_type: "refresh_token",
            refresh_token,
        };
        let base_request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
            .header("Authorization", self.basic_authorization())
            .form(&form)?;

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, "Refreshing access token");

            let outcome = self.http_client.execute(base_request.clone()).await;

            let failure = match outcome {
                Ok(response) if response.is_success() => {
                    let token: TokenResponse = response.json().map_err(|e| {
                        AuthError::TokenRefreshFailed(format!("Unreadable token response: {}", e))
                    })?;
                    return Ok(self.credential_from(token, refresh_token));
                }
                Ok(response) if response.is_client_error() => {
                    warn!(status = response.status, "Token endpoint rejected refresh grant");
                    return Err(AuthError::TokenRefreshFailed(format!(
                        "Token endpoint returned {}",
                        response.status
                    )));
                }
                Ok(response) => format!("Token endpoint returned {}", response.status),
                Err(e) if e.is_transport() => e.to_string(),
                Err(e) => return Err(AuthError::Http(e)),
            };

            if attempts >= MAX_ATTEMPTS {
                warn!(attempts = attempts, "Token endpoint unavailable, giving up");
                return Err(AuthError::TokenEndpointUnavailable {
                    attempts,
                    reason: failure,
                });
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            sleep(delay).await;
        }
    }

    fn credential_from(&self, token: TokenResponse, previous_refresh: &str) -> AccessCredential {
        let expires_at = self.clock.now() + chrono::Duration::seconds(token.expires_in.max(0));
        AccessCredential {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| previous_refresh.to_string()),
            expires_at,
            scope: token.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use bridge_traits::time::SystemClock;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            token_url: "https://accounts.example.com/api/token".to_string(),
        }
    }

    fn client(mock: MockHttpClient) -> OAuthClient {
        OAuthClient::new(config(), Arc::new(mock), Arc::new(SystemClock))
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let debug = format!("{:?}", config());
        assert!(debug.contains("client-id"));
        assert!(!debug.contains("client-secret"));
    }

    #[test]
    fn test_token_response_defaults() {
        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"new"}"#).unwrap();
        assert_eq!(token.expires_in, 3600);
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_sends_basic_auth_and_form() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .withf(|request| {
                let body = request.body.as_deref().unwrap_or_default();
                request.method == HttpMethod::Post
                    && request.headers.get("Authorization").map(String::as_str)
                        == Some("Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=")
                    && body == &b"grant_type=refresh_token&refresh_token=old-refresh"[..]
            })
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"access_token":"new-access","expires_in":1800,"scope":"playlist-read-private"}"#,
                ))
            });

        let before = chrono::Utc::now();
        let credential = client(mock).refresh("old-refresh").await.unwrap();

        assert_eq!(credential.access_token, "new-access");
        assert_eq!(credential.refresh_token, "old-refresh");
        assert_eq!(credential.scope.as_deref(), Some("playlist-read-private"));
        assert!(credential.expires_at >= before + chrono::Duration::seconds(1800));
    }

    #[tokio::test]
    async fn test_refresh_uses_rotated_refresh_token() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(HttpResponse::new(
                200,
                r#"{"access_token":"a2","refresh_token":"r2"}"#,
            ))
        });

        let credential = client(mock).refresh("r1").await.unwrap();
        assert_eq!(credential.refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_refresh_rejected_grant_is_not_retried() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(400, r#"{"error":"invalid_grant"}"#)));

        let err = client(mock).refresh("revoked").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRefreshFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_retries_server_errors() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(503, "")));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BridgeError::Timeout("slow".to_string())));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"access_token":"ok"}"#)));

        let credential = client(mock).refresh("r").await.unwrap();
        assert_eq!(credential.access_token, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_gives_up_after_three_attempts() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(3)
            .returning(|_| Ok(HttpResponse::new(502, "")));

        let err = client(mock).refresh("r").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::TokenEndpointUnavailable { attempts: 3, .. }
        ));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_transport_outage_is_not_a_rejection() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(3)
            .returning(|_| Err(BridgeError::ConnectionFailed("connection refused".to_string())));

        let err = client(mock).refresh("r").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpointUnavailable { .. }));
        assert!(!matches!(err, AuthError::TokenRefreshFailed(_)));
    }
}
