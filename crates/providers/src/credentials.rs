//! Lazy credential refresh for OAuth-style connections.
//!
//! API-key connections are used as-is. OAuth connections keep their access
//! token while more than [`REFRESH_MARGIN_SECS`] of validity remain; past
//! that, the token is exchanged through a [`TokenRefresher`] and the
//! connection is flagged `refreshed` so its owner can persist it.

use async_trait::async_trait;
use huddle_config::OAuthConfig;
use huddle_core::{Connection, ProviderError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Tokens expiring within this many seconds are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// New credentials returned by a refresh.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Absolute expiry, unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Relative expiry, used when `expires_at` is absent
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Some servers rotate the refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, connection: &Connection) -> Result<RefreshedToken, ProviderError>;
}

/// Return a usable access token for `connection`, refreshing it if needed.
///
/// `now` is unix seconds. On refresh the connection is updated in place and
/// `refreshed` is set.
pub async fn ensure_fresh(
    connection: &mut Connection,
    refresher: Option<&dyn TokenRefresher>,
    now: i64,
) -> Result<String, ProviderError> {
    if !connection.has_token() {
        return Err(ProviderError::NotConfigured(format!(
            "no access token for '{}'",
            connection.provider
        )));
    }

    if !connection.is_oauth() {
        return Ok(connection.access_token.clone());
    }

    if connection
        .expires_at
        .is_some_and(|exp| exp > now + REFRESH_MARGIN_SECS)
    {
        return Ok(connection.access_token.clone());
    }

    let Some(refresher) = refresher else {
        return Err(ProviderError::CredentialRefresh(format!(
            "token for '{}' expired and no refresher is configured",
            connection.provider
        )));
    };

    debug!(provider = %connection.provider, "Refreshing access token");
    let fresh = refresher.refresh(connection).await?;

    connection.access_token = fresh.access_token;
    connection.expires_at = fresh
        .expires_at
        .or_else(|| fresh.expires_in.map(|secs| now + secs));
    if let Some(rotated) = fresh.refresh_token.filter(|t| !t.is_empty()) {
        connection.refresh_token = Some(rotated);
    }
    connection.refreshed = true;

    info!(provider = %connection.provider, "Access token refreshed");
    Ok(connection.access_token.clone())
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
    provider: &'a str,
}

/// Refreshes tokens against an HTTP token endpoint.
pub struct HttpTokenRefresher {
    url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    client: reqwest::Client,
}

impl HttpTokenRefresher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client_id: None,
            client_secret: None,
            client,
        })
    }

    /// Build from the `[oauth]` section; `None` when no refresh URL is set.
    pub fn from_config(config: &OAuthConfig) -> Result<Option<Self>, ProviderError> {
        let Some(url) = config.refresh_url.as_deref() else {
            return Ok(None);
        };
        let mut refresher = Self::new(url, Duration::from_secs(config.timeout_secs))?;
        refresher.client_id = config.client_id.clone();
        refresher.client_secret = config.client_secret.clone();
        Ok(Some(refresher))
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, connection: &Connection) -> Result<RefreshedToken, ProviderError> {
        let refresh_token = connection.refresh_token.as_deref().unwrap_or_default();
        let body = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
            client_id: self.client_id.as_deref(),
            client_secret: self.client_secret.as_deref(),
            provider: &connection.provider,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::CredentialRefresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::CredentialRefresh(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        response
            .json::<RefreshedToken>()
            .await
            .map_err(|e| ProviderError::CredentialRefresh(format!("bad token response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingRefresher {
        calls: Mutex<usize>,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(0),
                fail,
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _c: &Connection) -> Result<RefreshedToken, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(ProviderError::CredentialRefresh("denied".into()));
            }
            Ok(RefreshedToken {
                access_token: "new-token".into(),
                expires_at: None,
                expires_in: Some(3600),
                refresh_token: None,
            })
        }
    }

    fn oauth(expires_at: Option<i64>) -> Connection {
        Connection {
            provider: "gemini".into(),
            access_token: "old-token".into(),
            refresh_token: Some("rt".into()),
            expires_at,
            ..Connection::default()
        }
    }

    #[tokio::test]
    async fn api_keys_are_never_refreshed() {
        let refresher = CountingRefresher::new(false);
        let mut conn = Connection::api_key("groq", "gsk");
        let token = ensure_fresh(&mut conn, Some(&refresher), 0).await.unwrap();
        assert_eq!(token, "gsk");
        assert_eq!(refresher.calls(), 0);
        assert!(!conn.refreshed);
    }

    #[tokio::test]
    async fn valid_token_is_reused() {
        let refresher = CountingRefresher::new(false);
        let mut conn = oauth(Some(1_000 + 61));
        let token = ensure_fresh(&mut conn, Some(&refresher), 1_000).await.unwrap();
        assert_eq!(token, "old-token");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed() {
        let refresher = CountingRefresher::new(false);
        let mut conn = oauth(Some(1_000 + 60));
        let token = ensure_fresh(&mut conn, Some(&refresher), 1_000).await.unwrap();
        assert_eq!(token, "new-token");
        assert_eq!(refresher.calls(), 1);
        assert!(conn.refreshed);
        assert_eq!(conn.expires_at, Some(4_600));
        assert_eq!(conn.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn missing_expiry_forces_refresh() {
        let refresher = CountingRefresher::new(false);
        let mut conn = oauth(None);
        ensure_fresh(&mut conn, Some(&refresher), 0).await.unwrap();
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces() {
        let refresher = CountingRefresher::new(true);
        let mut conn = oauth(Some(0));
        let err = ensure_fresh(&mut conn, Some(&refresher), 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::CredentialRefresh(_)));
        assert!(!conn.refreshed);
        assert_eq!(conn.access_token, "old-token");
    }

    #[tokio::test]
    async fn no_refresher_is_an_error_for_expired_oauth() {
        let mut conn = oauth(Some(0));
        let err = ensure_fresh(&mut conn, None, 1_000).await.unwrap_err();
        assert!(matches!(err, ProviderError::CredentialRefresh(_)));
    }

    #[test]
    fn refresher_from_config_requires_url() {
        assert!(
            HttpTokenRefresher::from_config(&OAuthConfig::default())
                .unwrap()
                .is_none()
        );
        let config = OAuthConfig {
            refresh_url: Some("https://auth.example.com/token".into()),
            ..OAuthConfig::default()
        };
        assert!(HttpTokenRefresher::from_config(&config).unwrap().is_some());
    }
}
