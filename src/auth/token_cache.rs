//! Persistent bearer-token cache
//!
//! One JSON file per (client id, authority) so a restarted process can reuse
//! a token until its recorded expiry.

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A bearer token together with the identity it was issued to
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    /// Bearer token value
    pub access_token: String,
    /// Instant after which the token must not be used
    pub expires_at: DateTime<Utc>,
    /// Client the token was issued to
    pub client_id: String,
    /// Authority that issued it
    pub authority: String,
    /// Scope it was issued for
    pub scope: String,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("client_id", &self.client_id)
            .field("authority", &self.authority)
            .field("scope", &self.scope)
            .finish()
    }
}

impl CachedToken {
    /// Whether the token is past its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Instant from which the token should be replaced
    ///
    /// The margin never exceeds half the lifetime left at `obtained_at`, so a
    /// short-lived token is still used for the first half of its life.
    pub fn refresh_at(&self, obtained_at: DateTime<Utc>, margin: Duration) -> DateTime<Utc> {
        let half_life = ((self.expires_at - obtained_at) / 2).max(Duration::zero());
        self.expires_at - margin.min(half_life)
    }

    /// Whether the token belongs to the given identity
    pub fn belongs_to(&self, client_id: &str, authority: &str, scope: &str) -> bool {
        self.client_id == client_id && self.authority == authority && self.scope == scope
    }
}

/// Location of the on-disk cache for one client/authority pair
#[derive(Debug, Clone)]
pub struct TokenCacheFile {
    path: PathBuf,
}

impl TokenCacheFile {
    /// Cache file inside `dir` for a client/authority pair
    pub fn new(dir: impl AsRef<Path>, client_id: &str, authority: &str) -> Self {
        let key = format!("{}\n{}", client_id, authority);
        let digest = ring::digest::digest(&ring::digest::SHA256, key.as_bytes());
        let hex: String = digest
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Self {
            path: dir.as_ref().join(format!(".tokencache-{}.json", &hex[..32])),
        }
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token, if any
    ///
    /// A missing or unreadable file is treated as an empty cache.
    pub fn load(&self) -> Option<CachedToken> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Token cache unreadable");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Token cache corrupt, ignoring");
                None
            }
        }
    }

    /// Persist a token, replacing the previous file atomically
    pub async fn store(&self, token: &CachedToken) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(token)?;
        let tmp = self.path.with_extension("json.tmp");
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Token cache updated");
        Ok(())
    }
}
