//! OAuth2 client-credentials decorator
//!
//! Keeps one bearer token in memory (and on disk), refreshing it through a
//! client-credentials grant when it expires. Refreshes are serialized so at
//! most one exchange is in flight per decorator.

use super::token_cache::{CachedToken, TokenCacheFile};
use super::AuthDecorator;
use crate::config::OAuth2Config;
use crate::error::{BridgeError, Result};
use crate::secret::SecretResolver;
use crate::translate::OutboundRequest;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use http::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Identity used for the client-credentials grant
#[derive(Clone)]
pub struct ClientCredentials {
    /// Issuing authority
    pub authority: String,
    /// Client identifier
    pub client_id: String,
    /// Clear-text client secret
    pub client_secret: String,
    /// Requested scope
    pub scope: String,
    /// Token endpoint URL
    pub token_endpoint: reqwest::Url,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish()
    }
}

/// Token returned by an exchange
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Bearer token value
    pub token: String,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
}

/// Performs the client-credentials grant
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Obtain a new token for the given identity
    async fn exchange(&self, credentials: &ClientCredentials) -> Result<AccessToken>;
}

/// Token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Client-credentials grant over HTTP
pub struct HttpTokenExchange {
    client: reqwest::Client,
}

impl HttpTokenExchange {
    /// Create with a request timeout
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create with a custom client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, credentials: &ClientCredentials) -> Result<AccessToken> {
        let requested_at = Utc::now();
        let response = self
            .client
            .post(credentials.token_endpoint.clone())
            .header(http::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("scope", credentials.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                BridgeError::Auth(format!(
                    "Token endpoint {} unreachable: {}",
                    credentials.token_endpoint, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Auth(format!(
                "Token endpoint returned {}: {}",
                status,
                body.chars().take(256).collect::<String>()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Auth(format!("Invalid token response: {}", e)))?;

        if let Some(token_type) = &parsed.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(BridgeError::Auth(format!(
                    "Unsupported token type '{}'",
                    token_type
                )));
            }
        }

        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS).max(0);
        Ok(AccessToken {
            token: parsed.access_token,
            expires_at: requested_at + Duration::seconds(lifetime),
        })
    }
}

/// Token in memory together with the instant it should be replaced
struct HeldToken {
    token: CachedToken,
    refresh_at: DateTime<Utc>,
}

/// Sets `Authorization: Bearer ...` using a cached client-credentials token
pub struct OAuth2Decorator {
    credentials: ClientCredentials,
    exchange: Arc<dyn TokenExchange>,
    cache_file: Option<TokenCacheFile>,
    current: RwLock<Option<HeldToken>>,
    refresh: Mutex<()>,
    refresh_margin: Duration,
}

impl OAuth2Decorator {
    /// Create a decorator; a matching token in `cache_dir` is reused
    pub fn new(
        credentials: ClientCredentials,
        exchange: Arc<dyn TokenExchange>,
        cache_dir: Option<PathBuf>,
        refresh_margin: std::time::Duration,
    ) -> Self {
        let cache_file = cache_dir
            .map(|dir| TokenCacheFile::new(dir, &credentials.client_id, &credentials.authority));

        let restored = cache_file
            .as_ref()
            .and_then(|file| file.load())
            .filter(|token| {
                token.belongs_to(
                    &credentials.client_id,
                    &credentials.authority,
                    &credentials.scope,
                )
            })
            .filter(|token| !token.is_expired(Utc::now()));

        if let Some(token) = &restored {
            tracing::debug!(
                client_id = credentials.client_id,
                expires_at = %token.expires_at,
                "Restored bearer token from cache"
            );
        }

        let refresh_margin = Duration::from_std(refresh_margin).unwrap_or_else(|_| Duration::zero());
        let restored = restored.map(|token| HeldToken {
            refresh_at: token.refresh_at(Utc::now(), refresh_margin),
            token,
        });

        Self {
            credentials,
            exchange,
            cache_file,
            current: RwLock::new(restored),
            refresh: Mutex::new(()),
            refresh_margin,
        }
    }

    /// Create from configuration, resolving the client secret
    pub fn from_config(config: &OAuth2Config, resolver: &dyn SecretResolver) -> Result<Self> {
        let credentials = ClientCredentials {
            authority: config.authority.clone(),
            client_id: config.client_id.clone(),
            client_secret: resolver.resolve(&config.client_secret)?,
            scope: config.scope.clone(),
            token_endpoint: config.token_endpoint()?,
        };
        let exchange = Arc::new(HttpTokenExchange::new(std::time::Duration::from_secs(30))?);
        let cache_dir = config.cache_dir.clone().unwrap_or_else(|| PathBuf::from("."));

        Ok(Self::new(
            credentials,
            exchange,
            Some(cache_dir),
            std::time::Duration::from_secs(config.refresh_margin_secs),
        ))
    }

    /// Current bearer token, exchanging for a new one when needed
    ///
    /// A token inside the refresh margin but not yet expired is handed to
    /// callers that arrive while another caller is already refreshing.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached(Utc::now(), true).await {
            return Ok(token);
        }

        let _guard = match self.refresh.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(token) = self.cached(Utc::now(), false).await {
                    return Ok(token);
                }
                self.refresh.lock().await
            }
        };

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.cached(Utc::now(), true).await {
            return Ok(token);
        }

        tracing::debug!(
            client_id = self.credentials.client_id,
            endpoint = %self.credentials.token_endpoint,
            "Requesting bearer token"
        );
        let obtained_at = Utc::now();
        let fresh = self.exchange.exchange(&self.credentials).await?;
        let token = CachedToken {
            access_token: fresh.token,
            expires_at: fresh.expires_at,
            client_id: self.credentials.client_id.clone(),
            authority: self.credentials.authority.clone(),
            scope: self.credentials.scope.clone(),
        };

        *self.current.write().await = Some(HeldToken {
            refresh_at: token.refresh_at(obtained_at, self.refresh_margin),
            token: token.clone(),
        });

        if let Some(file) = &self.cache_file {
            if let Err(e) = file.store(&token).await {
                tracing::warn!(error = %e, path = %file.path().display(), "Failed to persist bearer token");
            }
        }

        tracing::info!(
            client_id = self.credentials.client_id,
            expires_at = %token.expires_at,
            "Bearer token acquired"
        );
        Ok(token.access_token)
    }

    async fn cached(&self, now: DateTime<Utc>, require_fresh: bool) -> Option<String> {
        let current = self.current.read().await;
        let held = current.as_ref()?;
        let usable = if require_fresh {
            now < held.refresh_at
        } else {
            !held.token.is_expired(now)
        };
        usable.then(|| held.token.access_token.clone())
    }
}

#[async_trait]
impl AuthDecorator for OAuth2Decorator {
    async fn decorate(&self, req: &mut OutboundRequest) -> Result<()> {
        let token = self.access_token().await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| BridgeError::Auth("Token contains invalid header characters".to_string()))?;
        value.set_sensitive(true);
        req.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    fn name(&self) -> &str {
        "oauth2_client_credentials"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Counts exchanges; the first `expired_first` tokens are issued already expired
    struct MockExchange {
        calls: AtomicUsize,
        lifetime_secs: i64,
        expired_first: usize,
        delay: std::time::Duration,
    }

    impl MockExchange {
        fn new(lifetime_secs: i64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime_secs,
                expired_first: 0,
                delay: std::time::Duration::from_millis(50),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchange for MockExchange {
        async fn exchange(&self, _credentials: &ClientCredentials) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            let lifetime = if n <= self.expired_first {
                -1
            } else {
                self.lifetime_secs
            };
            Ok(AccessToken {
                token: format!("token-{}", n),
                expires_at: Utc::now() + Duration::seconds(lifetime),
            })
        }
    }

    fn credentials(endpoint: &str) -> ClientCredentials {
        ClientCredentials {
            authority: "https://login.example.com/tenant".to_string(),
            client_id: "bridge".to_string(),
            client_secret: "s3cr3t".to_string(),
            scope: "api://orders/.default".to_string(),
            token_endpoint: reqwest::Url::parse(endpoint).unwrap(),
        }
    }

    fn request() -> OutboundRequest {
        OutboundRequest {
            method: Method::POST,
            url: reqwest::Url::parse("http://upstream.local/").unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn decorator(exchange: Arc<MockExchange>, margin_secs: u64) -> OAuth2Decorator {
        OAuth2Decorator::new(
            credentials("http://idp.local/token"),
            exchange,
            None,
            std::time::Duration::from_secs(margin_secs),
        )
    }

    #[tokio::test]
    async fn test_sets_bearer_header() {
        let exchange = Arc::new(MockExchange::new(3600));
        let decorator = decorator(exchange.clone(), 60);
        let mut req = request();
        decorator.decorate(&mut req).await.unwrap();
        assert_eq!(req.headers[AUTHORIZATION], "Bearer token-1");
        assert_eq!(decorator.name(), "oauth2_client_credentials");
    }

    #[tokio::test]
    async fn test_valid_token_reused() {
        let exchange = Arc::new(MockExchange::new(3600));
        let decorator = decorator(exchange.clone(), 60);

        let mut first = request();
        let mut second = request();
        decorator.decorate(&mut first).await.unwrap();
        decorator.decorate(&mut second).await.unwrap();

        assert_eq!(exchange.calls(), 1);
        assert_eq!(first.headers[AUTHORIZATION], second.headers[AUTHORIZATION]);
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_once_under_concurrency() {
        let mut mock = MockExchange::new(3600);
        mock.expired_first = 1;
        let exchange = Arc::new(mock);
        let decorator = Arc::new(decorator(exchange.clone(), 0));

        // First token is issued already expired.
        assert_eq!(decorator.access_token().await.unwrap(), "token-1");
        assert_eq!(exchange.calls(), 1);

        let mut tasks = Vec::new();
        for _ in 0..25 {
            let decorator = decorator.clone();
            tasks.push(tokio::spawn(async move {
                let mut req = request();
                decorator.decorate(&mut req).await.unwrap();
                req.headers[AUTHORIZATION].to_str().unwrap().to_string()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "Bearer token-2");
        }

        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_short_lived_token_reused() {
        // Tokens live 30s, shorter than the 60s refresh margin
        let exchange = Arc::new(MockExchange::new(30));
        let decorator = decorator(exchange.clone(), 60);

        assert_eq!(decorator.access_token().await.unwrap(), "token-1");
        assert_eq!(decorator.access_token().await.unwrap(), "token-1");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_token_served_while_refreshing() {
        let mut mock = MockExchange::new(3600);
        mock.delay = std::time::Duration::from_millis(10);
        let exchange = Arc::new(mock);
        let decorator = Arc::new(decorator(exchange.clone(), 60));
        assert_eq!(decorator.access_token().await.unwrap(), "token-1");

        // Valid, but due for replacement
        if let Some(held) = decorator.current.write().await.as_mut() {
            held.refresh_at = Utc::now() - Duration::seconds(1);
        }

        let _held = decorator.refresh.lock().await;
        let token = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            decorator.access_token(),
        )
        .await
        .expect("stale token should be served without waiting")
        .unwrap();
        assert_eq!(token, "token-1");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_exchange_failure_propagates() {
        struct Failing;
        #[async_trait]
        impl TokenExchange for Failing {
            async fn exchange(&self, _: &ClientCredentials) -> Result<AccessToken> {
                Err(BridgeError::Auth("denied".to_string()))
            }
        }

        let decorator = OAuth2Decorator::new(
            credentials("http://idp.local/token"),
            Arc::new(Failing),
            None,
            std::time::Duration::from_secs(60),
        );
        let mut req = request();
        let err = decorator.decorate(&mut req).await.unwrap_err();
        assert!(matches!(err, BridgeError::Auth(_)));
        assert!(req.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_token_survives_restart_via_cache() {
        let dir = tempfile::tempdir().unwrap();

        let first_exchange = Arc::new(MockExchange::new(3600));
        let first = OAuth2Decorator::new(
            credentials("http://idp.local/token"),
            first_exchange.clone(),
            Some(dir.path().to_path_buf()),
            std::time::Duration::from_secs(60),
        );
        assert_eq!(first.access_token().await.unwrap(), "token-1");
        drop(first);

        let second_exchange = Arc::new(MockExchange::new(3600));
        let second = OAuth2Decorator::new(
            credentials("http://idp.local/token"),
            second_exchange.clone(),
            Some(dir.path().to_path_buf()),
            std::time::Duration::from_secs(60),
        );
        assert_eq!(second.access_token().await.unwrap(), "token-1");
        assert_eq!(second_exchange.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_token_for_other_scope_ignored() {
        let dir = tempfile::tempdir().unwrap();

        let first = OAuth2Decorator::new(
            credentials("http://idp.local/token"),
            Arc::new(MockExchange::new(3600)),
            Some(dir.path().to_path_buf()),
            std::time::Duration::from_secs(60),
        );
        first.access_token().await.unwrap();

        let mut other = credentials("http://idp.local/token");
        other.scope = "api://billing/.default".to_string();
        let exchange = Arc::new(MockExchange::new(3600));
        let second = OAuth2Decorator::new(
            other,
            exchange.clone(),
            Some(dir.path().to_path_buf()),
            std::time::Duration::from_secs(60),
        );
        second.access_token().await.unwrap();
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_http_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=bridge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 120
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = HttpTokenExchange::new(std::time::Duration::from_secs(5)).unwrap();
        let token = exchange
            .exchange(&credentials(&format!("{}/token", server.uri())))
            .await
            .unwrap();
        assert_eq!(token.token, "abc");
        let remaining = token.expires_at - Utc::now();
        assert!(remaining <= Duration::seconds(120));
        assert!(remaining > Duration::seconds(100));
    }

    #[tokio::test]
    async fn test_http_exchange_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let exchange = HttpTokenExchange::new(std::time::Duration::from_secs(5)).unwrap();
        let err = exchange
            .exchange(&credentials(&format!("{}/token", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Auth(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_http_exchange_rejects_non_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "mac"
            })))
            .mount(&server)
            .await;

        let exchange = HttpTokenExchange::new(std::time::Duration::from_secs(5)).unwrap();
        let err = exchange
            .exchange(&credentials(&format!("{}/token", server.uri())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported token type"));
    }
}
