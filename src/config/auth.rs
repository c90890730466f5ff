//! Authentication configuration: outbound credential decoration

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Authentication mode applied to every outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No credentials are attached (default)
    #[serde(alias = "")]
    None,
    /// Static HTTP Basic credentials
    #[serde(alias = "Basic")]
    Basic,
    /// OAuth2 client-credentials bearer tokens
    #[serde(alias = "oauth2", alias = "oauth2_0", alias = "OAuth2_0")]
    Oauth2ClientCredentials,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Basic => write!(f, "basic"),
            Self::Oauth2ClientCredentials => write!(f, "oauth2_client_credentials"),
        }
    }
}

/// Credential blocks; only the one matching the selected mode is used
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Basic credentials
    #[serde(default)]
    pub basic: Option<BasicAuthConfig>,

    /// OAuth2 client-credentials settings
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
}

impl AuthConfig {
    /// Check that the block for `mode` is present and complete
    pub fn validate(&self, mode: AuthMode) -> Result<()> {
        match mode {
            AuthMode::None => Ok(()),
            AuthMode::Basic => self
                .basic
                .as_ref()
                .ok_or_else(|| {
                    BridgeError::Config(
                        "authentication = \"basic\" requires an auth.basic block".to_string(),
                    )
                })?
                .validate(),
            AuthMode::Oauth2ClientCredentials => self
                .oauth2
                .as_ref()
                .ok_or_else(|| {
                    BridgeError::Config(
                        "authentication = \"oauth2_client_credentials\" requires an auth.oauth2 block"
                            .to_string(),
                    )
                })?
                .validate(),
        }
    }
}

/// HTTP Basic credentials
///
/// `password` may be an `env:NAME` reference or an encrypted value understood
/// by the configured secret resolver.
#[derive(Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    /// User name
    pub username: String,
    /// Password, before secret resolution
    pub password: String,
}

impl std::fmt::Debug for BasicAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicAuthConfig {
    fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(BridgeError::Config(
                "auth.basic requires 'username'".to_string(),
            ));
        }
        if self.username.contains(':') {
            return Err(BridgeError::Config(
                "auth.basic username cannot contain ':'".to_string(),
            ));
        }
        Ok(())
    }
}

/// OAuth2 client-credentials settings
///
/// # Example
///
/// ```hcl
/// auth {
///   oauth2 {
///     authority     = "https://login.example.com/tenant"
///     client_id     = "bridge"
///     client_secret = "env:BRIDGE_CLIENT_SECRET"
///     scope         = "api://orders/.default"
///   }
/// }
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// Issuing authority base URL
    pub authority: String,

    /// Client identifier
    pub client_id: String,

    /// Client secret, before secret resolution
    pub client_secret: String,

    /// Requested scope
    pub scope: String,

    /// Token endpoint; defaults to `{authority}/oauth2/v2.0/token`
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// Directory holding the token cache file (default: working directory)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Seconds before expiry at which a token is refreshed
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

impl std::fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("token_endpoint", &self.token_endpoint)
            .field("cache_dir", &self.cache_dir)
            .field("refresh_margin_secs", &self.refresh_margin_secs)
            .finish()
    }
}

impl OAuth2Config {
    /// Resolved token endpoint URL
    pub fn token_endpoint(&self) -> Result<reqwest::Url> {
        let raw = match &self.token_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{}/oauth2/v2.0/token", self.authority.trim_end_matches('/')),
        };
        reqwest::Url::parse(&raw)
            .map_err(|e| BridgeError::Config(format!("Invalid token endpoint '{}': {}", raw, e)))
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("authority", &self.authority),
            ("client_id", &self.client_id),
            ("scope", &self.scope),
        ] {
            if value.trim().is_empty() {
                return Err(BridgeError::Config(format!(
                    "auth.oauth2 requires '{}'",
                    field
                )));
            }
        }
        self.token_endpoint()?;
        Ok(())
    }
}

fn default_refresh_margin() -> u64 {
    60
}
