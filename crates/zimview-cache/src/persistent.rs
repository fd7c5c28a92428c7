//! Versioned persistent tier.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};
use url::Url;
use zimview_core::paths;

use crate::CacheError;

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Cache key the entry was stored under.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response MIME type.
    pub mime_type: String,

    /// Response body.
    pub body: Bytes,

    /// Stored at timestamp (ms since epoch).
    pub stored_at: u64,
}

/// Metadata kept next to a body by backends that store it separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredMeta {
    pub url: String,
    pub status: u16,
    pub mime_type: String,
    pub stored_at: u64,
    /// Hex SHA-256 of the body this metadata was written with.
    pub body_sha256: String,
}

impl From<&CachedResponse> for StoredMeta {
    fn from(entry: &CachedResponse) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            mime_type: entry.mime_type.clone(),
            stored_at: entry.stored_at,
            body_sha256: format!("{:x}", Sha256::digest(&entry.body)),
        }
    }
}

impl StoredMeta {
    pub(crate) fn describes(&self, body: &[u8]) -> bool {
        format!("{:x}", Sha256::digest(body)) == self.body_sha256
    }

    pub(crate) fn into_response(self, body: Bytes) -> CachedResponse {
        CachedResponse {
            url: self.url,
            status: self.status,
            mime_type: self.mime_type,
            body,
            stored_at: self.stored_at,
        }
    }
}

/// Storage behind the persistent tier.
///
/// Writes are last-write-wins per key. An entry may disappear between two
/// calls; callers re-check instead of assuming presence.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    async fn put(&self, cache: &str, entry: CachedResponse) -> Result<(), CacheError>;

    /// Delete a whole named cache. Returns whether it existed.
    async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError>;

    async fn cache_names(&self) -> Result<Vec<String>, CacheError>;
}

/// Backend keeping every named cache in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    caches: RwLock<HashMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches.get(cache).and_then(|c| c.get(key)).cloned())
    }

    async fn put(&self, cache: &str, entry: CachedResponse) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        caches
            .entry(cache.to_string())
            .or_default()
            .insert(entry.url.clone(), entry);
        Ok(())
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }
}

/// The persistent tier for one application version.
#[derive(Clone)]
pub struct PersistentCache {
    name: String,
    prefix: String,
    backend: Arc<dyn CacheBackend>,
}

impl PersistentCache {
    /// Open the cache `<prefix>-<version>` on `backend`.
    pub fn new(prefix: &str, version: &str, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            name: format!("{prefix}-{version}"),
            prefix: prefix.to_string(),
            backend,
        }
    }

    /// In-memory persistent tier.
    pub fn in_memory(prefix: &str, version: &str) -> Self {
        Self::new(prefix, version, Arc::new(MemoryBackend::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a request URL.
    pub async fn match_url(&self, url: &Url) -> Result<Option<CachedResponse>, CacheError> {
        let key = paths::cache_key(url);
        let hit = self.backend.get(&self.name, &key).await?;
        trace!(cache = %self.name, %key, hit = hit.is_some(), "Persistent lookup");
        Ok(hit)
    }

    /// Store a response for a request URL.
    pub async fn put(
        &self,
        url: &Url,
        status: u16,
        mime_type: &str,
        body: Bytes,
    ) -> Result<(), CacheError> {
        let key = paths::cache_key(url);
        debug!(cache = %self.name, %key, bytes = body.len(), "Caching response");
        self.backend
            .put(
                &self.name,
                CachedResponse {
                    url: key,
                    status,
                    mime_type: mime_type.to_string(),
                    body,
                    stored_at: zimview_common::unix_millis(),
                },
            )
            .await
    }

    /// Delete caches of other versions sharing this prefix.
    pub async fn purge_stale(&self) -> Result<usize, CacheError> {
        let version_prefix = format!("{}-", self.prefix);
        let mut purged = 0;
        for name in self.backend.cache_names().await? {
            if name != self.name
                && name.starts_with(&version_prefix)
                && self.backend.delete_cache(&name).await?
            {
                info!(cache = %name, "Purged stale cache");
                purged += 1;
            }
        }
        Ok(purged)
    }
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("name", &self.name)
            .finish()
    }
}
