//! HTTP listener: relays each inbound request to the target and the target's
//! response back to the caller

use super::{Lifecycle, Listener};
use crate::client::{is_hop_by_hop, ForwardingClient, UpstreamResponse};
use crate::config::{HttpListenerConfig, ListenPrefix};
use crate::error::{BridgeError, Result};
use crate::translate::TranslationProfile;
use crate::ProxyState;
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// HTTP inbound listener
pub struct HttpProxyListener {
    config: HttpListenerConfig,
    client: Arc<ForwardingClient>,
    lifecycle: Lifecycle,
}

struct RelayContext {
    client: Arc<ForwardingClient>,
    profile: TranslationProfile,
    prefix: ListenPrefix,
}

impl HttpProxyListener {
    /// Create a stopped listener
    pub fn new(config: HttpListenerConfig, client: Arc<ForwardingClient>) -> Self {
        Self {
            config,
            client,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Listener configuration
    pub fn config(&self) -> &HttpListenerConfig {
        &self.config
    }
}

#[async_trait]
impl Listener for HttpProxyListener {
    fn protocol(&self) -> &'static str {
        "http"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let run = self.lifecycle.begin(self.protocol(), &cancel)?;

        self.config.validate()?;
        let prefix = self.config.listen_prefix()?;
        let addr = prefix.addr;
        let ctx = Arc::new(RelayContext {
            client: self.client.clone(),
            profile: self.config.profile()?,
            prefix,
        });

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to bind HTTP {}: {}", addr, e)))?;
        let local = listener.local_addr()?;
        run.bound(local);

        tracing::info!(
            address = %local,
            prefix = %ctx.prefix.path,
            target = %ctx.profile.target_url,
            "HTTP listener started"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = run.token().cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept HTTP connection");
                        continue;
                    }
                },
            };

            let ctx = ctx.clone();
            let token = run.token().child_token();
            tokio::spawn(async move {
                ctx.client.metrics().inc_connections();
                let conn = http1::Builder::new().serve_connection(
                    TokioIo::new(stream),
                    service_fn(|req| handle_request(req, peer, ctx.clone())),
                );
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = token.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, peer = %peer, "HTTP connection ended");
                }
                ctx.client.metrics().dec_connections();
            });
        }

        tracing::info!(address = %local, "HTTP listener stopped");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.lifecycle.end(self.protocol())
    }

    fn state(&self) -> ProxyState {
        self.lifecycle.state()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }
}

async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();

    if !ctx.prefix.matches(parts.uri.path()) {
        tracing::debug!(peer = %peer, path = parts.uri.path(), "Request outside listen prefix");
        return Ok(error_response(StatusCode::NOT_FOUND, "Not found"));
    }

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, peer = %peer, "Failed to read request body");
            return Ok(error_response(StatusCode::BAD_REQUEST, "Unreadable request body"));
        }
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let outbound = match ctx.profile.build(&parts.method, &body, content_type) {
        Ok(outbound) => outbound,
        Err(e) => {
            ctx.client.metrics().record_dropped();
            tracing::warn!(error = %e, peer = %peer, method = %parts.method, "Request rejected");
            return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    match ctx.client.send(outbound).await {
        Ok(upstream) => {
            if upstream.is_success() {
                tracing::debug!(
                    peer = %peer,
                    method = %parts.method,
                    status = upstream.status.as_u16(),
                    "Relayed"
                );
            } else {
                tracing::warn!(
                    peer = %peer,
                    method = %parts.method,
                    status = upstream.status.as_u16(),
                    "Upstream returned error status"
                );
            }
            Ok(relay_response(upstream))
        }
        Err(e) => {
            tracing::warn!(error = %e, peer = %peer, "Forward failed");
            Ok(error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable"))
        }
    }
}

/// Copy status, headers and body; Content-Length is recomputed on write
fn relay_response(upstream: UpstreamResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(upstream.body));
    *response.status_mut() = upstream.status;
    let headers = response.headers_mut();
    for (name, value) in upstream.headers.iter() {
        if name == header::CONTENT_LENGTH || is_hop_by_hop(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
