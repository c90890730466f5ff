//! Proxy layer: inbound listeners feeding the forwarding client
//!
//! Three listener variants share one start/stop contract. TCP and UDP forward
//! one way through a [`Notifier`]; HTTP relays the upstream response back.

pub mod datagram;
pub mod http;
pub mod stream;

pub use self::datagram::DatagramProxyListener;
pub use self::http::HttpProxyListener;
pub use self::stream::StreamProxyListener;

use crate::client::{ForwardPermit, ForwardingClient};
use crate::error::{BridgeError, Result};
use crate::translate::TranslationProfile;
use crate::ProxyState;
use async_trait::async_trait;
use bytes::Bytes;
use ::http::Method;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// An inbound endpoint with a Stopped/Running lifecycle
#[async_trait]
pub trait Listener: Send + Sync {
    /// Transport name for logs ("tcp", "udp", "http")
    fn protocol(&self) -> &'static str;

    /// Bind and serve until [`Listener::stop`] is called or `cancel` fires
    ///
    /// Fails with [`BridgeError::Lifecycle`] if already running, leaving the
    /// running instance untouched.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Stop accepting work. In-flight forwards are left to finish.
    fn stop(&self) -> Result<()>;

    /// Current lifecycle state
    fn state(&self) -> ProxyState;

    /// Bound address while running
    fn local_addr(&self) -> Option<SocketAddr>;
}

#[derive(Default)]
struct LifecycleInner {
    generation: u64,
    cancel: Option<CancellationToken>,
    local_addr: Option<SocketAddr>,
}

/// Shared Stopped/Running bookkeeping for listeners
#[derive(Default)]
pub(crate) struct Lifecycle {
    inner: Mutex<LifecycleInner>,
}

impl Lifecycle {
    fn lock(&self) -> std::sync::MutexGuard<'_, LifecycleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter Running under a child of `parent`
    pub(crate) fn begin(&self, protocol: &'static str, parent: &CancellationToken) -> Result<Run<'_>> {
        let mut inner = self.lock();
        if inner.cancel.is_some() {
            return Err(BridgeError::Lifecycle(format!(
                "{} listener is already running",
                protocol
            )));
        }
        inner.generation += 1;
        let token = parent.child_token();
        inner.cancel = Some(token.clone());
        inner.local_addr = None;
        Ok(Run {
            lifecycle: self,
            generation: inner.generation,
            token,
        })
    }

    /// Leave Running and signal the serving loop
    pub(crate) fn end(&self, protocol: &'static str) -> Result<()> {
        let mut inner = self.lock();
        match inner.cancel.take() {
            Some(token) => {
                token.cancel();
                inner.local_addr = None;
                Ok(())
            }
            None => Err(BridgeError::Lifecycle(format!(
                "{} listener is already stopped",
                protocol
            ))),
        }
    }

    pub(crate) fn state(&self) -> ProxyState {
        if self.lock().cancel.is_some() {
            ProxyState::Running
        } else {
            ProxyState::Stopped
        }
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }
}

/// One Running period; dropping it returns the lifecycle to Stopped
pub(crate) struct Run<'a> {
    lifecycle: &'a Lifecycle,
    generation: u64,
    token: CancellationToken,
}

impl Run<'_> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn bound(&self, addr: SocketAddr) {
        let mut inner = self.lifecycle.lock();
        if inner.generation == self.generation && inner.cancel.is_some() {
            inner.local_addr = Some(addr);
        }
    }
}

impl Drop for Run<'_> {
    fn drop(&mut self) {
        let mut inner = self.lifecycle.lock();
        // A later start may already own the lifecycle
        if inner.generation == self.generation {
            inner.cancel = None;
            inner.local_addr = None;
        }
    }
}

/// One-way forwarder: sends a payload upstream and logs the outcome
#[derive(Clone)]
pub struct Notifier {
    client: Arc<ForwardingClient>,
    profile: Arc<TranslationProfile>,
    content_type: Arc<str>,
}

impl Notifier {
    /// Create a notifier posting with a fixed content type
    pub fn new(
        client: Arc<ForwardingClient>,
        profile: TranslationProfile,
        content_type: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            client,
            profile: Arc::new(profile),
            content_type: content_type.into(),
        }
    }

    /// Forward one unit as a POST; the response body is discarded
    pub async fn notify(&self, payload: Bytes, origin: SocketAddr) {
        match self.client.reserve().await {
            Ok(permit) => self.forward(permit, payload, origin).await,
            Err(e) => tracing::warn!(error = %e, peer = %origin, "Forward failed"),
        }
    }

    /// Wait for a forward slot, then spawn the forward as an independent task
    ///
    /// Resolves once the task is spawned, so callers are held back while
    /// `max_in_flight` forwards are outstanding.
    pub async fn dispatch(
        &self,
        payload: Bytes,
        origin: SocketAddr,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let permit = self.client.reserve().await?;
        let notifier = self.clone();
        Ok(tokio::spawn(async move {
            notifier.forward(permit, payload, origin).await
        }))
    }

    async fn forward(&self, permit: ForwardPermit, payload: Bytes, origin: SocketAddr) {
        let request = match self
            .profile
            .build(&Method::POST, &payload, Some(&*self.content_type))
        {
            Ok(request) => request,
            Err(e) => {
                self.client.metrics().record_dropped();
                tracing::warn!(error = %e, peer = %origin, bytes = payload.len(), "Unit dropped");
                return;
            }
        };

        match self.client.send_reserved(permit, request).await {
            Ok(resp) if resp.is_success() => {
                tracing::debug!(
                    peer = %origin,
                    status = resp.status.as_u16(),
                    bytes = payload.len(),
                    "Forwarded"
                );
            }
            Ok(resp) => {
                tracing::warn!(
                    peer = %origin,
                    status = resp.status.as_u16(),
                    "Upstream rejected forward"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, peer = %origin, "Forward failed");
            }
        }
    }
}
