//! # Bridge Gateway
//!
//! A protocol-bridging proxy: accepts TCP streams, UDP datagrams or HTTP
//! requests and forwards each unit of input to a single HTTP upstream,
//! optionally transcoding text and attaching outbound credentials.
//!
//! ## Architecture
//!
//! ```text
//! Listener (TCP | UDP | HTTP) → ContentTranslator → AuthDecorator → ForwardingClient → Upstream
//! ```
//!
//! ## Core Features
//!
//! - **Three inbound transports**: one POST per TCP read or UDP datagram; HTTP
//!   requests relayed with their response
//! - **Text transcoding**: between any two `encoding_rs` character sets for
//!   textual media types
//! - **Outbound auth**: HTTP Basic or OAuth2 client credentials with an
//!   on-disk token cache
//! - **Bounded client**: shared connection pool with periodic recycling and an
//!   in-flight cap
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bridge_gateway::{Bridge, config::BridgeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> bridge_gateway::Result<()> {
//!     let config = BridgeConfig::from_file("bridge.hcl").await?;
//!     let bridge = Bridge::new(config)?;
//!     bridge.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod proxy;
pub mod secret;
pub mod translate;

// Re-export main types
pub use bridge::Bridge;
pub use client::{ForwardingClient, UpstreamResponse};
pub use error::{BridgeError, Result};
pub use proxy::Listener;

use config::Protocol;
use serde::{Deserialize, Serialize};

/// Listener lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxyState {
    /// Not accepting input
    #[default]
    Stopped,
    /// Bound and accepting input
    Running,
}

impl std::fmt::Display for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Bridge health status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current listener state
    pub state: ProxyState,
    /// Active inbound transport
    pub protocol: Protocol,
    /// Seconds since the bridge was created
    pub uptime_secs: u64,
    /// Open inbound connections
    pub active_connections: usize,
    /// Forwards that produced an upstream response
    pub forwarded: u64,
    /// Forwards that failed without a response
    pub failed: u64,
}
