//! Basic authentication decorator

use super::AuthDecorator;
use crate::config::BasicAuthConfig;
use crate::error::{BridgeError, Result};
use crate::secret::SecretResolver;
use crate::translate::OutboundRequest;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{HeaderValue, AUTHORIZATION};

/// Sets `Authorization: Basic ...` on every request
///
/// The header is computed once at construction.
pub struct BasicAuthDecorator {
    header: HeaderValue,
}

impl BasicAuthDecorator {
    /// Create from clear-text credentials
    pub fn new(username: &str, password: &str) -> Result<Self> {
        let encoded = STANDARD.encode(format!("{}:{}", username, password));
        let mut header = HeaderValue::from_str(&format!("Basic {}", encoded))
            .map_err(|e| BridgeError::Config(format!("Invalid basic credentials: {}", e)))?;
        header.set_sensitive(true);
        Ok(Self { header })
    }

    /// Create from configuration, resolving the password
    pub fn from_config(config: &BasicAuthConfig, resolver: &dyn SecretResolver) -> Result<Self> {
        let password = resolver.resolve(&config.password)?;
        Self::new(&config.username, &password)
    }
}

#[async_trait]
impl AuthDecorator for BasicAuthDecorator {
    async fn decorate(&self, req: &mut OutboundRequest) -> Result<()> {
        req.headers.insert(AUTHORIZATION, self.header.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "basic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::EnvSecretResolver;
    use bytes::Bytes;
    use http::{HeaderMap, Method};

    fn request() -> OutboundRequest {
        OutboundRequest {
            method: Method::POST,
            url: reqwest::Url::parse("http://upstream.local/").unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_basic_header_value() {
        let decorator = BasicAuthDecorator::new("alice", "secret").unwrap();
        let mut req = request();
        decorator.decorate(&mut req).await.unwrap();
        assert_eq!(req.headers[AUTHORIZATION], "Basic YWxpY2U6c2VjcmV0");
        assert!(req.headers[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test]
    async fn test_basic_replaces_existing_header() {
        let decorator = BasicAuthDecorator::new("admin", "secret").unwrap();
        let mut req = request();
        req.headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        decorator.decorate(&mut req).await.unwrap();
        assert_eq!(req.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(req.headers[AUTHORIZATION], "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn test_from_config_resolves_env_password() {
        std::env::set_var("BRIDGE_TEST_BASIC_PASSWORD", "secret");
        let config = BasicAuthConfig {
            username: "alice".to_string(),
            password: "env:BRIDGE_TEST_BASIC_PASSWORD".to_string(),
        };
        let decorator = BasicAuthDecorator::from_config(&config, &EnvSecretResolver).unwrap();
        assert_eq!(decorator.header, "Basic YWxpY2U6c2VjcmV0");
    }

    #[test]
    fn test_from_config_rejects_encrypted_password() {
        let config = BasicAuthConfig {
            username: "alice".to_string(),
            password: "CypherValue!Zm9v".to_string(),
        };
        assert!(BasicAuthDecorator::from_config(&config, &EnvSecretResolver).is_err());
    }
}
