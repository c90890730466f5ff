//! Forwarding client: the single outbound HTTP transport shared by every
//! listener in the process
//!
//! Applies the configured auth decorator, bounds concurrent forwards, and
//! replaces its connection pool once it reaches the configured lifetime so
//! long-running deployments re-resolve DNS.

use crate::auth::AuthDecorator;
use crate::config::ClientConfig;
use crate::error::{BridgeError, Result};
use crate::observability::ForwardMetrics;
use crate::translate::OutboundRequest;
use bytes::Bytes;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Response from the upstream target
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: reqwest::StatusCode,
    /// Response headers
    pub headers: reqwest::header::HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A reserved slot for one forward; released on drop
#[derive(Debug)]
pub struct ForwardPermit {
    _permit: OwnedSemaphorePermit,
}

struct PooledClient {
    client: reqwest::Client,
    created: Instant,
}

/// Shared outbound HTTP client
pub struct ForwardingClient {
    pool: RwLock<PooledClient>,
    settings: ClientConfig,
    decorator: Option<Arc<dyn AuthDecorator>>,
    permits: Arc<Semaphore>,
    metrics: Arc<ForwardMetrics>,
}

impl ForwardingClient {
    /// Create a client with an optional auth decorator
    pub fn new(settings: ClientConfig, decorator: Option<Arc<dyn AuthDecorator>>) -> Result<Self> {
        let client = build_client(&settings)?;
        Ok(Self {
            pool: RwLock::new(PooledClient {
                client,
                created: Instant::now(),
            }),
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
            decorator,
            metrics: Arc::new(ForwardMetrics::new()),
        })
    }

    /// Create a client with default settings and no authentication
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default(), None)
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> &Arc<ForwardMetrics> {
        &self.metrics
    }

    /// Name of the active decorator, if any
    pub fn decorator_name(&self) -> Option<&str> {
        self.decorator.as_deref().map(|d| d.name())
    }

    /// Wait for one of the `max_in_flight` forward slots
    pub async fn reserve(&self) -> Result<ForwardPermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::Cancelled)?;
        Ok(ForwardPermit { _permit: permit })
    }

    /// Decorate and send one request, returning the full upstream response
    ///
    /// Exactly one attempt is made.
    pub async fn send(&self, req: OutboundRequest) -> Result<UpstreamResponse> {
        let permit = self.reserve().await?;
        self.send_reserved(permit, req).await
    }

    /// [`ForwardingClient::send`] using a slot obtained from [`ForwardingClient::reserve`]
    pub async fn send_reserved(
        &self,
        permit: ForwardPermit,
        mut req: OutboundRequest,
    ) -> Result<UpstreamResponse> {
        self.metrics.forward_started();
        let result = self.do_send(&mut req).await;
        self.metrics.forward_finished();

        match &result {
            Ok(resp) => self
                .metrics
                .record_response(resp.status.as_u16(), req.body.len() as u64),
            Err(_) => self.metrics.record_failure(),
        }
        drop(permit);
        result
    }

    async fn do_send(&self, req: &mut OutboundRequest) -> Result<UpstreamResponse> {
        if let Some(decorator) = &self.decorator {
            decorator.decorate(req).await?;
        }

        let client = self.current_client()?;
        let response = client
            .request(req.method.clone(), req.url.clone())
            .headers(req.headers.clone())
            .body(req.body.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    fn classify(&self, e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::UpstreamUnavailable(format!(
                "timed out after {}ms",
                self.settings.timeout().as_millis()
            ))
        } else if e.is_connect() {
            BridgeError::UpstreamUnavailable(format!("cannot connect: {}", e))
        } else {
            BridgeError::UpstreamUnavailable(e.to_string())
        }
    }

    /// The pooled client, rebuilt when older than the connection lifetime
    fn current_client(&self) -> Result<reqwest::Client> {
        let lifetime = self.settings.connection_lifetime();
        {
            let pool = self.pool.read().unwrap_or_else(PoisonError::into_inner);
            if !is_stale(pool.created, lifetime) {
                return Ok(pool.client.clone());
            }
        }

        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        if is_stale(pool.created, lifetime) {
            pool.client = build_client(&self.settings)?;
            pool.created = Instant::now();
            tracing::debug!(
                lifetime_secs = lifetime.as_secs(),
                "Outbound connection pool recycled"
            );
        }
        Ok(pool.client.clone())
    }
}

/// A zero lifetime disables recycling
fn is_stale(created: Instant, lifetime: Duration) -> bool {
    !lifetime.is_zero() && created.elapsed() >= lifetime
}

fn build_client(settings: &ClientConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(settings.timeout())
        .user_agent(settings.user_agent.clone())
        .pool_max_idle_per_host(100);
    if !settings.connection_lifetime().is_zero() {
        builder = builder.pool_idle_timeout(settings.connection_lifetime());
    }
    Ok(builder.build()?)
}

/// Check if a header is a hop-by-hop header that should not be relayed
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BasicAuthDecorator;
    use http::{HeaderMap, Method};
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: &str, body: &'static str) -> OutboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "text/plain".parse().unwrap());
        OutboundRequest {
            method: Method::POST,
            url: reqwest::Url::parse(url).unwrap(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("X-Custom-Header"));
    }

    #[test]
    fn test_is_stale() {
        let now = Instant::now();
        assert!(!is_stale(now, Duration::from_secs(120)));
        assert!(!is_stale(now, Duration::ZERO));
        let old = now - Duration::from_secs(5);
        assert!(is_stale(old, Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_send_relays_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(header("content-type", "text/plain"))
            .and(body_string("ping"))
            .respond_with(ResponseTemplate::new(201).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ForwardingClient::with_defaults().unwrap();
        let resp = client
            .send(request(&format!("{}/ingest", server.uri()), "ping"))
            .await
            .unwrap();
        assert_eq!(resp.status, reqwest::StatusCode::CREATED);
        assert_eq!(resp.body, Bytes::from_static(b"ok"));
        assert!(resp.is_success());

        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.status_2xx, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn test_send_applies_decorator() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let decorator: Arc<dyn AuthDecorator> =
            Arc::new(BasicAuthDecorator::new("alice", "secret").unwrap());
        let client = ForwardingClient::new(ClientConfig::default(), Some(decorator)).unwrap();
        assert_eq!(client.decorator_name(), Some("basic"));
        let resp = client
            .send(request(&server.uri(), "x"))
            .await
            .unwrap();
        assert_eq!(resp.status, reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_sets_user_agent() {
        let server = MockServer::start().await;
        let settings = ClientConfig {
            user_agent: "bridge-test".to_string(),
            ..Default::default()
        };
        Mock::given(header("user-agent", "bridge-test"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ForwardingClient::new(settings, None).unwrap();
        client.send(request(&server.uri(), "x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ForwardingClient::with_defaults().unwrap();
        let resp = client.send(request(&server.uri(), "x")).await.unwrap();
        assert_eq!(resp.status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(!resp.is_success());
        assert_eq!(client.metrics().snapshot().status_5xx, 1);
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let client = ForwardingClient::with_defaults().unwrap();
        let err = client
            .send(request("http://127.0.0.1:1/", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UpstreamUnavailable(_)));
        assert_eq!(client.metrics().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let settings = ClientConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        let client = ForwardingClient::new(settings, None).unwrap();
        let err = client.send(request(&server.uri(), "x")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_max_in_flight_bounds_concurrent_sends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(2)
            .mount(&server)
            .await;

        let settings = ClientConfig {
            max_in_flight: 1,
            ..Default::default()
        };
        let client = Arc::new(ForwardingClient::new(settings, None).unwrap());
        let uri = server.uri();

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let client = client.clone();
            let uri = uri.clone();
            tasks.push(tokio::spawn(async move {
                client.send(request(&uri, "x")).await.unwrap().status
            }));
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(client.metrics().snapshot().in_flight, 1);

        for task in tasks {
            assert_eq!(task.await.unwrap(), reqwest::StatusCode::OK);
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reserved_slot_blocks_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let settings = ClientConfig {
            max_in_flight: 1,
            ..Default::default()
        };
        let client = ForwardingClient::new(settings, None).unwrap();
        let permit = client.reserve().await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(100), client.send(request(&server.uri(), "x")))
                .await;
        assert!(blocked.is_err());

        let resp = client
            .send_reserved(permit, request(&server.uri(), "x"))
            .await
            .unwrap();
        assert!(resp.is_success());
        client.send(request(&server.uri(), "x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_recycled_after_lifetime() {
        let settings = ClientConfig {
            pooled_connection_lifetime_secs: 1,
            ..Default::default()
        };
        let client = ForwardingClient::new(settings, None).unwrap();
        let before = client.pool.read().unwrap().created;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        client.current_client().unwrap();
        let after = client.pool.read().unwrap().created;
        assert!(after > before);
    }
}
