//! Centralized error types for the bridge

use thiserror::Error;

/// Bridge error types
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or incomplete configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A forwarding unit could not be turned into an outbound request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Text transcoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Inbound socket failure (peer disconnect, read error)
    #[error("Transport fault: {0}")]
    Transport(String),

    /// Outbound send failed before a response was received
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Credential acquisition failed
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Start/stop called in the wrong state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Operation interrupted by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether the error marks a unit that was dropped because its content was
    /// unusable, as opposed to a delivery failure
    pub fn is_malformed_unit(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::Encoding(_))
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;
