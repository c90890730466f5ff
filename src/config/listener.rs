//! Listener configuration: one block per inbound transport

use crate::error::{BridgeError, Result};
use crate::translate::{self, TranslationProfile};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Inbound transport selected for the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Persistent byte streams
    #[serde(alias = "Tcp", alias = "TCP")]
    Tcp,
    /// Connectionless datagrams
    #[serde(alias = "Udp", alias = "UDP")]
    Udp,
    /// Inbound HTTP requests (default)
    #[serde(alias = "Http", alias = "HTTP")]
    Http,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Http
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// TCP listener configuration
///
/// # Example
///
/// ```hcl
/// tcp {
///   address      = "127.0.0.1"
///   port         = 16000
///   target_url   = "https://example.com/ingest"
///   content_type = "text/plain"
///   buffer_size  = 1024
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpListenerConfig {
    /// IP address to bind
    #[serde(default = "default_bind_address")]
    pub address: String,

    /// Port to bind (1–65535)
    pub port: u16,

    /// Absolute http(s) URL every read is forwarded to
    #[serde(default)]
    pub target_url: Option<String>,

    /// Content type attached to every forward
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Encoding label of inbound text (e.g. "utf-8")
    #[serde(default)]
    pub source_encoding: Option<String>,

    /// Encoding label text is converted to before forwarding
    #[serde(default)]
    pub target_encoding: Option<String>,

    /// Maximum bytes per read; one read is one forward
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Pause between reads on a connection, in milliseconds
    #[serde(default)]
    pub read_pause_ms: u64,
}

impl TcpListenerConfig {
    /// Create a config with defaults for everything but the endpoints
    pub fn new(address: impl Into<String>, port: u16, target_url: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            target_url: Some(target_url.into()),
            content_type: default_content_type(),
            source_encoding: None,
            target_encoding: None,
            buffer_size: default_buffer_size(),
            read_pause_ms: 0,
        }
    }

    /// Validated bind address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        bind_addr(&self.address, self.port)
    }

    /// Validated forwarding profile
    pub fn profile(&self) -> Result<TranslationProfile> {
        profile(
            self.target_url.as_deref(),
            self.source_encoding.as_deref(),
            self.target_encoding.as_deref(),
        )
    }

    /// Check the block for consistency
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        self.profile()?;
        if self.buffer_size == 0 {
            return Err(BridgeError::Config(
                "tcp buffer_size must be greater than zero".to_string(),
            ));
        }
        validate_content_type(&self.content_type)
    }
}

/// UDP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpListenerConfig {
    /// IP address to bind
    #[serde(default = "default_bind_address")]
    pub address: String,

    /// Port to bind (1–65535)
    pub port: u16,

    /// Absolute http(s) URL every datagram is forwarded to
    #[serde(default)]
    pub target_url: Option<String>,

    /// Content type attached to every forward
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Encoding label of inbound text
    #[serde(default)]
    pub source_encoding: Option<String>,

    /// Encoding label text is converted to before forwarding
    #[serde(default)]
    pub target_encoding: Option<String>,

    /// Receive buffer size; longer datagrams are truncated by the OS
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl UdpListenerConfig {
    /// Create a config with defaults for everything but the endpoints
    pub fn new(address: impl Into<String>, port: u16, target_url: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            target_url: Some(target_url.into()),
            content_type: default_content_type(),
            source_encoding: None,
            target_encoding: None,
            max_datagram_size: default_max_datagram_size(),
        }
    }

    /// Validated bind address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        bind_addr(&self.address, self.port)
    }

    /// Validated forwarding profile
    pub fn profile(&self) -> Result<TranslationProfile> {
        profile(
            self.target_url.as_deref(),
            self.source_encoding.as_deref(),
            self.target_encoding.as_deref(),
        )
    }

    /// Check the block for consistency
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        self.profile()?;
        if self.max_datagram_size == 0 {
            return Err(BridgeError::Config(
                "udp max_datagram_size must be greater than zero".to_string(),
            ));
        }
        validate_content_type(&self.content_type)
    }
}

/// HTTP listener configuration
///
/// The content type of each forward is taken from the inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpListenerConfig {
    /// URL prefix to serve, e.g. "http://127.0.0.1:16000/"
    #[serde(default = "default_listen_url")]
    pub listen_url: String,

    /// Absolute http(s) URL every request is forwarded to
    #[serde(default)]
    pub target_url: Option<String>,

    /// Encoding label of inbound text
    #[serde(default)]
    pub source_encoding: Option<String>,

    /// Encoding label text is converted to before forwarding
    #[serde(default)]
    pub target_encoding: Option<String>,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            listen_url: default_listen_url(),
            target_url: None,
            source_encoding: None,
            target_encoding: None,
        }
    }
}

/// Socket address and path prefix parsed from a listen URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenPrefix {
    /// Address to bind
    pub addr: SocketAddr,
    /// Path prefix requests must fall under; always ends with '/'
    pub path: String,
}

impl ListenPrefix {
    /// Whether a request path falls under this prefix
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path) || format!("{}/", path) == self.path
    }
}

impl HttpListenerConfig {
    /// Create a config with defaults for the encodings
    pub fn new(listen_url: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            listen_url: listen_url.into(),
            target_url: Some(target_url.into()),
            source_encoding: None,
            target_encoding: None,
        }
    }

    /// Parse the listen URL into a bind address and path prefix
    pub fn listen_prefix(&self) -> Result<ListenPrefix> {
        let url = reqwest::Url::parse(&self.listen_url).map_err(|e| {
            BridgeError::Config(format!("Invalid listen_url '{}': {}", self.listen_url, e))
        })?;
        if url.scheme() != "http" {
            return Err(BridgeError::Config(format!(
                "listen_url '{}' must use http (TLS termination is not supported)",
                self.listen_url
            )));
        }
        let host = url.host_str().ok_or_else(|| {
            BridgeError::Config(format!("listen_url '{}' has no host", self.listen_url))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = match host {
            "localhost" => bind_addr("127.0.0.1", port)?,
            other => bind_addr(other, port)?,
        };

        let mut path = url.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }

        Ok(ListenPrefix { addr, path })
    }

    /// Validated forwarding profile
    pub fn profile(&self) -> Result<TranslationProfile> {
        profile(
            self.target_url.as_deref(),
            self.source_encoding.as_deref(),
            self.target_encoding.as_deref(),
        )
    }

    /// Check the block for consistency
    pub fn validate(&self) -> Result<()> {
        self.listen_prefix()?;
        self.profile()?;
        Ok(())
    }
}

/// Parse and range-check a bind address
pub fn bind_addr(address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = address.parse().map_err(|e| {
        BridgeError::Config(format!("Invalid bind address '{}': {}", address, e))
    })?;
    if port == 0 {
        return Err(BridgeError::Config(
            "Bind port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(SocketAddr::new(ip, port))
}

/// Parse a target URL; it must be absolute and use http or https
pub fn target_url(url: Option<&str>) -> Result<reqwest::Url> {
    let raw = url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| BridgeError::Config("target_url is required".to_string()))?;
    let parsed = reqwest::Url::parse(raw)
        .map_err(|e| BridgeError::Config(format!("Invalid target_url '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(BridgeError::Config(format!(
            "target_url '{}' must be an absolute http or https URL",
            raw
        ))),
    }
}

fn profile(
    target: Option<&str>,
    source_encoding: Option<&str>,
    target_encoding: Option<&str>,
) -> Result<TranslationProfile> {
    Ok(TranslationProfile {
        target_url: target_url(target)?,
        source_encoding: config_encoding(source_encoding)?,
        target_encoding: match config_encoding(target_encoding)? {
            Some(encoding) if !translate::can_encode(encoding) => {
                return Err(BridgeError::Config(format!(
                    "target_encoding '{}' is decode-only",
                    encoding.name()
                )))
            }
            encoding => encoding,
        },
    })
}

fn config_encoding(label: Option<&str>) -> Result<Option<&'static encoding_rs::Encoding>> {
    translate::encoding_for_label(label).map_err(|e| BridgeError::Config(e.to_string()))
}

fn validate_content_type(content_type: &str) -> Result<()> {
    if content_type.trim().is_empty() {
        return Err(BridgeError::Config("content_type cannot be empty".to_string()));
    }
    http::HeaderValue::from_str(content_type).map_err(|_| {
        BridgeError::Config(format!("content_type '{}' is not a valid header value", content_type))
    })?;
    Ok(())
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

fn default_buffer_size() -> usize {
    1024
}

fn default_max_datagram_size() -> usize {
    65535
}

fn default_listen_url() -> String {
    "http://127.0.0.1:16000/".to_string()
}
