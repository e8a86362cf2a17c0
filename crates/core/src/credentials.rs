//! Calendar Credentials
//!
//! The booking flow only needs one capability from the OAuth world: "give me
//! an access token that is valid right now". [`GoogleTokenProvider`] serves
//! that from a token file written by the consent flow, caching the token in
//! memory and refreshing it when it is about to expire.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Upper bound on one refresh round trip; the refresh lock is held meanwhile.
const REFRESH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// A bearer token for the calendar API. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Why no valid access token could be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("Google Calendar is not connected; complete the OAuth consent flow first")]
    NotConnected,
    #[error("could not read token file: {0}")]
    Unreadable(String),
    #[error("token file is malformed: {0}")]
    Malformed(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Supplies access tokens to the calendar write. Shared by every session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a currently valid token, refreshing it first if needed.
    async fn access_token(&self) -> Result<AccessToken, CredentialError>;

    /// Whether credentials exist at all (without validating them).
    async fn is_connected(&self) -> bool;
}

/// The on-disk token format shared with the OAuth consent flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// ISO-8601; written without an offset by some clients, in which case it is UTC.
    pub expiry: Option<String>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

impl StoredTokens {
    fn expiry(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?;
        if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
            return Some(dt);
        }
        raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
    }

    /// The stored access token, if present and not about to expire.
    /// A token without an expiry is trusted as-is.
    fn usable_token(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        let token = self.token.clone().filter(|t| !t.is_empty())?;
        let cached = CachedToken {
            token: AccessToken::new(token),
            expires_at: self.expiry(),
        };
        cached.is_fresh(now).then_some(cached)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now + Duration::seconds(EXPIRY_MARGIN_SECS),
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// Serves Google OAuth tokens from a token file, refreshing on demand.
///
/// Reads go through an `RwLock`, so sessions holding a fresh token never wait
/// on each other. Refreshes are serialized by a separate mutex so that many
/// sessions discovering an expired token at once trigger a single refresh.
pub struct GoogleTokenProvider {
    path: PathBuf,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl GoogleTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    async fn cached(&self) -> Option<AccessToken> {
        let now = Utc::now();
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.is_fresh(now))
            .map(|cached| cached.token.clone())
    }

    async fn load(&self) -> Result<StoredTokens, CredentialError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotConnected);
            }
            Err(e) => return Err(CredentialError::Unreadable(e.to_string())),
        };
        serde_json::from_str(&raw).map_err(|e| CredentialError::Malformed(e.to_string()))
    }

    async fn store(&self, tokens: &StoredTokens) -> Result<(), CredentialError> {
        let serialized = serde_json::to_string_pretty(tokens)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        tokio::fs::write(&self.path, serialized)
            .await
            .map_err(|e| CredentialError::Unreadable(e.to_string()))
    }

    async fn refresh(&self, mut tokens: StoredTokens) -> Result<CachedToken, CredentialError> {
        let refresh_token = tokens
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(CredentialError::NotConnected)?;

        info!(token_uri = %tokens.token_uri, "Refreshing Google access token");
        let response = self
            .http
            .post(&tokens.token_uri)
            .timeout(REFRESH_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", tokens.client_id.as_str()),
                ("client_secret", tokens.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CredentialError::RefreshFailed(format!("{status}: {body}")));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        let expires_at = refreshed
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        tokens.token = Some(refreshed.access_token.clone());
        tokens.expiry = expires_at.map(|dt| dt.to_rfc3339());
        if let Some(rotated) = refreshed.refresh_token {
            tokens.refresh_token = Some(rotated);
        }
        if let Err(e) = self.store(&tokens).await {
            // The refreshed token is still good for this process.
            warn!(error = %e, "Failed to persist refreshed token");
        }

        Ok(CachedToken {
            token: AccessToken::new(refreshed.access_token),
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for GoogleTokenProvider {
    async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        let _refreshing = self.refresh_lock.lock().await;
        // Another session may have refreshed while we waited.
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        let tokens = self.load().await?;
        let fresh = match tokens.usable_token(Utc::now()) {
            Some(stored) => {
                debug!("Using access token from token file");
                stored
            }
            None => self.refresh(tokens).await?,
        };
        let token = fresh.token.clone();
        *self.cache.write().await = Some(fresh);
        Ok(token)
    }

    async fn is_connected(&self) -> bool {
        match self.load().await {
            Ok(tokens) => tokens.refresh_token.is_some() || tokens.token.is_some(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_tokens(dir: &TempDir, tokens: serde_json::Value) -> PathBuf {
        let path = dir.path().join("google_tokens.json");
        std::fs::write(&path, tokens.to_string()).unwrap();
        path
    }

    fn expired_tokens(token_uri: &str) -> serde_json::Value {
        json!({
            "token": "stale-token",
            "refresh_token": "refresh-123",
            "token_uri": token_uri,
            "client_id": "client-id",
            "client_secret": "client-secret",
            "scopes": ["https://www.googleapis.com/auth/calendar.events"],
            "expiry": "2020-01-01T00:00:00"
        })
    }

    #[tokio::test]
    async fn test_missing_token_file_is_not_connected() {
        let dir = TempDir::new().unwrap();
        let provider = GoogleTokenProvider::new(dir.path().join("absent.json"));

        assert_eq!(provider.access_token().await.unwrap_err(), CredentialError::NotConnected);
        assert!(!provider.is_connected().await);
    }

    #[tokio::test]
    async fn test_malformed_token_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("google_tokens.json");
        std::fs::write(&path, "not json").unwrap();
        let provider = GoogleTokenProvider::new(path);

        assert!(matches!(
            provider.access_token().await,
            Err(CredentialError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_fresh_stored_token_is_used_without_refresh() {
        let dir = TempDir::new().unwrap();
        let expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let path = write_tokens(
            &dir,
            json!({
                "token": "live-token",
                "refresh_token": "refresh-123",
                "client_id": "id",
                "client_secret": "secret",
                "expiry": expiry
            }),
        );
        let provider = GoogleTokenProvider::new(path);

        assert_eq!(provider.access_token().await.unwrap().secret(), "live-token");
        assert!(provider.is_connected().await);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let path = write_tokens(&dir, expired_tokens(&format!("{}/token", server.uri())));
        let provider = GoogleTokenProvider::new(path.clone());

        assert_eq!(provider.access_token().await.unwrap().secret(), "new-token");
        // Served from cache the second time; the mock expects exactly one hit.
        assert_eq!(provider.access_token().await.unwrap().secret(), "new-token");

        let persisted: StoredTokens =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted.token.as_deref(), Some("new-token"));
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-123"));
        assert!(persisted.expiry().unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "shared", "expires_in": 3600 }))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let path = write_tokens(&dir, expired_tokens(&format!("{}/token", server.uri())));
        let provider = Arc::new(GoogleTokenProvider::new(path));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.access_token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().secret(), "shared");
        }
    }

    #[tokio::test]
    async fn test_rejected_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let path = write_tokens(&dir, expired_tokens(&format!("{}/token", server.uri())));
        let provider = GoogleTokenProvider::new(path);

        match provider.access_token().await {
            Err(CredentialError::RefreshFailed(detail)) => assert!(detail.contains("invalid_grant")),
            other => panic!("expected refresh failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token() {
        let dir = TempDir::new().unwrap();
        let path = write_tokens(
            &dir,
            json!({
                "token": "stale",
                "client_id": "id",
                "client_secret": "secret",
                "expiry": "2020-01-01T00:00:00Z"
            }),
        );
        let provider = GoogleTokenProvider::new(path);
        assert_eq!(provider.access_token().await.unwrap_err(), CredentialError::NotConnected);
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret");
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}
