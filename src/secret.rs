//! Secret resolution for credentials read from configuration
//!
//! Decrypting at-rest secrets is owned outside the bridge. The default
//! resolver only understands clear text and `env:NAME` references, and refuses
//! values that carry the encryption marker.

use crate::error::{BridgeError, Result};

/// Prefix marking an encrypted configuration value
pub const ENCRYPTED_MARKER: &str = "CypherValue!";

/// Prefix marking a value read from the process environment
const ENV_PREFIX: &str = "env:";

/// Turns a configured credential into clear text
pub trait SecretResolver: Send + Sync {
    /// Resolve a possibly indirect or encrypted value
    fn resolve(&self, value: &str) -> Result<String>;
}

/// Resolver for clear-text and environment-backed secrets
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, value: &str) -> Result<String> {
        if is_encrypted(value) {
            return Err(BridgeError::Config(
                "encrypted secret found but no decrypting resolver is configured".to_string(),
            ));
        }

        match value.strip_prefix(ENV_PREFIX) {
            Some(name) => std::env::var(name).map_err(|_| {
                BridgeError::Config(format!("environment variable '{}' is not set", name))
            }),
            None => Ok(value.to_string()),
        }
    }
}

/// Whether a value carries the encryption marker (case-insensitive)
pub fn is_encrypted(value: &str) -> bool {
    value
        .get(..ENCRYPTED_MARKER.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(ENCRYPTED_MARKER))
        .unwrap_or(false)
}
