use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenCacheError {
    #[error("writing token cache {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding token cache record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One access token as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn new(token: String, ttl_seconds: i64, issued_at: DateTime<Utc>) -> Self {
        Self {
            token,
            issued_at,
            expires_at: issued_at + Duration::seconds(ttl_seconds),
        }
    }

    /// Usable only while `now + margin < expires_at`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Durable single-slot token store.
///
/// The record lives in a JSON file so it survives restarts; an in-memory
/// copy saves the file read on the hot path. Clones share both. Reads fail
/// closed: anything unreadable, unparsable or expired is reported as absent.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: Arc<PathBuf>,
    safety_margin: Duration,
    current: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>, safety_margin: Duration) -> Self {
        Self {
            path: Arc::new(path.into()),
            safety_margin,
            current: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Current token if one is still usable.
    pub async fn get(&self) -> Option<String> {
        self.get_at(Utc::now()).await.map(|cached| cached.token)
    }

    /// Same as [`get`](Self::get) against an explicit clock.
    pub async fn get_at(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.is_usable_at(now, self.safety_margin) {
                return Some(cached.clone());
            }
        }

        let cached = self.read_file().await?;
        if !cached.is_usable_at(now, self.safety_margin) {
            debug!(expires_at = %cached.expires_at, "cached token expired or inside safety margin");
            return None;
        }
        *self.current.write().await = Some(cached.clone());
        Some(cached)
    }

    /// Persist a freshly issued token, replacing whatever was there.
    ///
    /// The record is written to a sibling temp file and renamed into place so
    /// readers only ever see a complete record. Concurrent writers race and
    /// the last rename wins.
    pub async fn store(&self, token: &str, ttl_seconds: i64) -> Result<CachedToken, TokenCacheError> {
        let cached = CachedToken::new(token.to_string(), ttl_seconds, Utc::now());
        let body = serde_json::to_vec_pretty(&cached)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let tmp = self.tmp_path();
        if let Err(source) = tokio::fs::write(&tmp, &body).await {
            return Err(self.io_error(source));
        }
        if let Err(source) = tokio::fs::rename(&tmp, self.path.as_path()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(source));
        }

        *self.current.write().await = Some(cached.clone());
        debug!(expires_at = %cached.expires_at, path = %self.path.display(), "token cached");
        Ok(cached)
    }

    /// Drop the cached token. Invalidating an empty cache is a no-op.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
        match tokio::fs::remove_file(self.path.as_path()).await {
            Ok(()) => debug!(path = %self.path.display(), "token cache cleared"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove token cache file"),
        }
    }

    async fn read_file(&self) -> Option<CachedToken> {
        let raw = match tokio::fs::read(self.path.as_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read token cache");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed token cache");
                None
            }
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token_cache".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }

    fn io_error(&self, source: std::io::Error) -> TokenCacheError {
        TokenCacheError::Io {
            path: self.path.to_path_buf(),
            source,
        }
    }
}
