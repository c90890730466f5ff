//! Datagram listener: each UDP datagram becomes one upstream POST
//!
//! The receive loop never waits on an individual forward, only for a free slot
//! once `max_in_flight` forwards are outstanding. Nothing is sent back to the
//! datagram's sender.

use super::{Lifecycle, Listener, Notifier};
use crate::client::ForwardingClient;
use crate::config::UdpListenerConfig;
use crate::error::{BridgeError, Result};
use crate::ProxyState;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// UDP inbound listener
pub struct DatagramProxyListener {
    config: UdpListenerConfig,
    client: Arc<ForwardingClient>,
    lifecycle: Lifecycle,
}

impl DatagramProxyListener {
    /// Create a stopped listener
    pub fn new(config: UdpListenerConfig, client: Arc<ForwardingClient>) -> Self {
        Self {
            config,
            client,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Listener configuration
    pub fn config(&self) -> &UdpListenerConfig {
        &self.config
    }
}

#[async_trait]
impl Listener for DatagramProxyListener {
    fn protocol(&self) -> &'static str {
        "udp"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let run = self.lifecycle.begin(self.protocol(), &cancel)?;

        self.config.validate()?;
        let addr = self.config.bind_addr()?;
        let notifier = Notifier::new(
            self.client.clone(),
            self.config.profile()?,
            self.config.content_type.as_str(),
        );

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to bind UDP {}: {}", addr, e)))?;
        let local = socket.local_addr()?;
        run.bound(local);

        tracing::info!(
            address = %local,
            target = self.config.target_url.as_deref().unwrap_or_default(),
            "UDP listener started"
        );

        let mut buf = vec![0u8; self.config.max_datagram_size];
        loop {
            let (n, peer) = tokio::select! {
                _ = run.token().cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "UDP receive error");
                        continue;
                    }
                },
            };

            tracing::debug!(peer = %peer, bytes = n, "Datagram received");
            tokio::select! {
                _ = run.token().cancelled() => break,
                dispatched = notifier.dispatch(Bytes::copy_from_slice(&buf[..n]), peer) => {
                    if let Err(e) = dispatched {
                        tracing::warn!(error = %e, peer = %peer, "Datagram dropped");
                    }
                }
            }
        }

        tracing::info!(address = %local, "UDP listener stopped");
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
