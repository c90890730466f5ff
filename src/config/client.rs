//! Outbound client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the shared forwarding client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Age after which pooled connections are dropped and re-established
    #[serde(default = "default_connection_lifetime")]
    pub pooled_connection_lifetime_secs: u64,

    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User-Agent sent upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum number of forwards in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pooled_connection_lifetime_secs: default_connection_lifetime(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ClientConfig {
    /// Connection reuse lifetime
    pub fn connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.pooled_connection_lifetime_secs)
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_connection_lifetime() -> u64 {
    120
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("bridge-gateway/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_in_flight() -> usize {
    1024
}
