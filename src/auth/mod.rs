//! Outbound authentication: decorators that attach credentials to each
//! request just before it is sent
//!
//! Exactly one decorator (or none) is active per process, chosen by the
//! `authentication` selector.

mod basic;
pub mod oauth2;
mod token_cache;

pub use basic::BasicAuthDecorator;
pub use oauth2::{AccessToken, ClientCredentials, HttpTokenExchange, OAuth2Decorator, TokenExchange};
pub use token_cache::{CachedToken, TokenCacheFile};

use crate::config::{AuthConfig, AuthMode};
use crate::error::{BridgeError, Result};
use crate::secret::SecretResolver;
use crate::translate::OutboundRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Request decorator applied immediately before send
#[async_trait]
pub trait AuthDecorator: Send + Sync {
    /// Attach credentials to the request
    async fn decorate(&self, req: &mut OutboundRequest) -> Result<()>;

    /// Decorator name for logging
    fn name(&self) -> &str;
}

/// Build the decorator selected by `mode`, resolving secrets once
pub fn from_config(
    mode: AuthMode,
    config: &AuthConfig,
    resolver: &dyn SecretResolver,
) -> Result<Option<Arc<dyn AuthDecorator>>> {
    let decorator: Arc<dyn AuthDecorator> = match mode {
        AuthMode::None => return Ok(None),
        AuthMode::Basic => {
            let basic = config.basic.as_ref().ok_or_else(|| {
                BridgeError::Config("basic authentication selected without auth.basic".to_string())
            })?;
            Arc::new(BasicAuthDecorator::from_config(basic, resolver)?)
        }
        AuthMode::Oauth2ClientCredentials => {
            let oauth2 = config.oauth2.as_ref().ok_or_else(|| {
                BridgeError::Config(
                    "oauth2 authentication selected without auth.oauth2".to_string(),
                )
            })?;
            Arc::new(OAuth2Decorator::from_config(oauth2, resolver)?)
        }
    };

    tracing::info!(decorator = decorator.name(), "Outbound authentication enabled");
    Ok(Some(decorator))
}
