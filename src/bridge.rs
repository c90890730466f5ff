//! Bridge orchestrator: wires configuration into one running listener
//!
//! Builds the secret resolver, the auth decorator, the shared forwarding
//! client and the selected listener, in that order.

use crate::auth;
use crate::client::ForwardingClient;
use crate::config::{BridgeConfig, Protocol};
use crate::error::{BridgeError, Result};
use crate::observability::ForwardMetrics;
use crate::proxy::{DatagramProxyListener, HttpProxyListener, Listener, StreamProxyListener};
use crate::secret::{EnvSecretResolver, SecretResolver};
use crate::{HealthStatus, ProxyState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The protocol bridge: one listener feeding one upstream
pub struct Bridge {
    config: BridgeConfig,
    client: Arc<ForwardingClient>,
    listener: Arc<dyn Listener>,
    start_time: Instant,
}

impl Bridge {
    /// Create a bridge, resolving secrets from the environment
    pub fn new(config: BridgeConfig) -> Result<Self> {
        Self::with_resolver(config, &EnvSecretResolver)
    }

    /// Create a bridge with a custom secret resolver
    pub fn with_resolver(config: BridgeConfig, resolver: &dyn SecretResolver) -> Result<Self> {
        config.validate()?;

        let decorator = auth::from_config(config.authentication, &config.auth, resolver)?;
        let client = Arc::new(ForwardingClient::new(config.client.clone(), decorator)?);
        let listener = build_listener(&config, client.clone())?;

        tracing::info!(
            protocol = %config.protocol,
            authentication = %config.authentication,
            "Bridge configured"
        );

        Ok(Self {
            config,
            client,
            listener,
            start_time: Instant::now(),
        })
    }

    /// Run the listener until `cancel` fires or [`Bridge::stop`] is called
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let result = self.listener.start(cancel).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, protocol = self.listener.protocol(), "Listener failed");
        }
        result
    }

    /// Stop the listener
    pub fn stop(&self) -> Result<()> {
        tracing::info!(protocol = self.listener.protocol(), "Bridge stopping");
        self.listener.stop()
    }

    /// Current listener state
    pub fn state(&self) -> ProxyState {
        self.listener.state()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Health snapshot
    pub fn health(&self) -> HealthStatus {
        let snapshot = self.client.metrics().snapshot();
        HealthStatus {
            state: self.state(),
            protocol: self.config.protocol,
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_connections: snapshot.active_connections.max(0) as usize,
            forwarded: snapshot.forwarded,
            failed: snapshot.failed,
        }
    }

    /// Forwarding metrics
    pub fn metrics(&self) -> &Arc<ForwardMetrics> {
        self.client.metrics()
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

fn build_listener(config: &BridgeConfig, client: Arc<ForwardingClient>) -> Result<Arc<dyn Listener>> {
    let missing = |name: &str| BridgeError::Config(format!("missing {} block", name));
    Ok(match config.protocol {
        Protocol::Tcp => {
            let tcp = config.tcp.clone().ok_or_else(|| missing("tcp"))?;
            Arc::new(StreamProxyListener::new(tcp, client))
        }
        Protocol::Udp => {
            let udp = config.udp.clone().ok_or_else(|| missing("udp"))?;
            Arc::new(DatagramProxyListener::new(udp, client))
        }
        Protocol::Http => {
            let http = config.http.clone().ok_or_else(|| missing("http"))?;
            Arc::new(HttpProxyListener::new(http, client))
        }
    })
}
