//! Configuration types for the bridge
//!
//! One document selects exactly one inbound transport and one outbound
//! authentication mode. Uses HCL (HashiCorp Configuration Language).

mod auth;
mod client;
mod listener;

pub use auth::{AuthConfig, AuthMode, BasicAuthConfig, OAuth2Config};
pub use client::ClientConfig;
pub use listener::{
    bind_addr, target_url, HttpListenerConfig, ListenPrefix, Protocol, TcpListenerConfig,
    UdpListenerConfig,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Starter configuration printed by `bridge-gateway template`
pub const TEMPLATE: &str = r#"# Inbound transport: "tcp", "udp" or "http"
protocol = "http"

# Outbound authentication: "none", "basic" or "oauth2_client_credentials"
authentication = "none"

tcp {
  address      = "127.0.0.1"
  port         = 16000
  target_url   = "https://example.com/"
  content_type = "text/plain"
  buffer_size  = 1024
}

udp {
  address      = "127.0.0.1"
  port         = 16000
  target_url   = "https://example.com/"
  content_type = "text/plain"
}

http {
  listen_url = "http://127.0.0.1:16000/"
  target_url = "https://example.com/"
}

auth {
  basic {
    username = "user"
    password = "env:BRIDGE_BASIC_PASSWORD"
  }
  oauth2 {
    authority     = "https://login.example.com/tenant"
    client_id     = "bridge"
    client_secret = "env:BRIDGE_CLIENT_SECRET"
    scope         = "api://example/.default"
  }
}

client {
  pooled_connection_lifetime_secs = 120
  timeout_secs                    = 30
}
"#;

/// Top-level bridge configuration
///
/// # HCL Example
///
/// ```hcl
/// protocol       = "tcp"
/// authentication = "basic"
///
/// tcp {
///   address    = "0.0.0.0"
///   port       = 16000
///   target_url = "https://collector.example.com/ingest"
/// }
///
/// auth {
///   basic {
///     username = "bridge"
///     password = "env:BRIDGE_PASSWORD"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Active inbound transport
    #[serde(default)]
    pub protocol: Protocol,

    /// Active authentication mode
    #[serde(default)]
    pub authentication: AuthMode,

    /// TCP listener block
    #[serde(default)]
    pub tcp: Option<TcpListenerConfig>,

    /// UDP listener block
    #[serde(default)]
    pub udp: Option<UdpListenerConfig>,

    /// HTTP listener block
    #[serde(default)]
    pub http: Option<HttpListenerConfig>,

    /// Credential blocks
    #[serde(default)]
    pub auth: AuthConfig,

    /// Outbound client settings
    #[serde(default)]
    pub client: ClientConfig,
}

impl BridgeConfig {
    /// Load configuration from an HCL file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_hcl(&content)
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Validate the configuration for consistency
    ///
    /// Only the blocks for the selected transport and authentication mode are
    /// checked; the others may stay in the file as templates.
    pub fn validate(&self) -> Result<()> {
        match self.protocol {
            Protocol::Tcp => self.tcp.as_ref().ok_or_else(|| missing_block("tcp"))?.validate()?,
            Protocol::Udp => self.udp.as_ref().ok_or_else(|| missing_block("udp"))?.validate()?,
            Protocol::Http => {
                self.http.as_ref().ok_or_else(|| missing_block("http"))?.validate()?
            }
        }

        self.auth.validate(self.authentication)?;

        if self.client.max_in_flight == 0 {
            return Err(BridgeError::Config(
                "client.max_in_flight must be greater than zero".to_string(),
            ));
        }
        if self.client.timeout_secs == 0 {
            return Err(BridgeError::Config(
                "client.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn missing_block(protocol: &str) -> BridgeError {
    BridgeError::Config(format!(
        "protocol = \"{}\" requires a {} block",
        protocol, protocol
    ))
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            authentication: AuthMode::None,
            tcp: None,
            udp: None,
            http: Some(HttpListenerConfig::default()),
            auth: AuthConfig::default(),
            client: ClientConfig::default(),
        }
    }
}
