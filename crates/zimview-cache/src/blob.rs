//! In-memory tier of reusable blob handles.
//!
//! Entries are keyed by `(ArchiveId, path)` and stamped with the generation
//! they were inserted in. Switching archives clears everything and starts a
//! new generation; an insert computed for a previous archive is not cached.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};
use zimview_core::ArchiveId;

/// Unique identifier for a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(u64);

impl BlobId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Extracted bytes that pages can reference by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub id: BlobId,
    pub mime_type: String,
    pub content: Bytes,
}

impl BlobHandle {
    pub fn new(mime_type: impl Into<String>, content: Bytes) -> Self {
        Self {
            id: BlobId::new(),
            mime_type: mime_type.into(),
            content,
        }
    }

    /// URL the page uses to reference this blob.
    pub fn url(&self) -> String {
        format!("blob:zimview/{}", self.id.0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Current number of cached blobs
    pub count: usize,

    /// Archive switches seen
    pub generation: u64,
}

impl CacheStats {
    /// Get the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug)]
struct BlobEntry {
    handle: Arc<BlobHandle>,
    generation: u64,
}

struct BlobTier {
    archive: Option<ArchiveId>,
    entries: LruCache<(ArchiveId, String), BlobEntry>,
    stats: CacheStats,
}

/// Memory cache of blob handles for the active archive
pub struct BlobCache {
    tier: Mutex<BlobTier>,
}

impl BlobCache {
    /// Create a new cache with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tier: Mutex::new(BlobTier {
                archive: None,
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BlobTier> {
        self.tier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `archive` the active archive, dropping every cached handle.
    pub fn switch_archive(&self, archive: ArchiveId) {
        let mut tier = self.lock();
        if tier.archive == Some(archive) {
            return;
        }
        tier.entries.clear();
        tier.archive = Some(archive);
        tier.stats.generation += 1;
        tier.stats.count = 0;
        debug!(%archive, generation = tier.stats.generation, "Blob tier reset");
    }

    /// Active archive, if any
    pub fn active_archive(&self) -> Option<ArchiveId> {
        self.lock().archive
    }

    /// Get a handle for a path
    pub fn get(&self, archive: ArchiveId, path: &str) -> Option<Arc<BlobHandle>> {
        let mut tier = self.lock();
        let generation = tier.stats.generation;
        let hit = tier
            .entries
            .get(&(archive, path.to_string()))
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.handle.clone());

        if hit.is_some() {
            tier.stats.hits += 1;
        } else {
            tier.stats.misses += 1;
        }
        trace!(%archive, path, hit = hit.is_some(), "Blob lookup");
        hit
    }

    /// Wrap content as a blob and cache it when `archive` is still active.
    pub fn insert(
        &self,
        archive: ArchiveId,
        path: &str,
        mime_type: &str,
        content: Bytes,
    ) -> Arc<BlobHandle> {
        let handle = Arc::new(BlobHandle::new(mime_type, content));
        let mut tier = self.lock();
        if tier.archive != Some(archive) {
            debug!(%archive, path, "Not caching blob for inactive archive");
            return handle;
        }
        let generation = tier.stats.generation;
        tier.entries.put(
            (archive, path.to_string()),
            BlobEntry {
                handle: handle.clone(),
                generation,
            },
        );
        let count = tier.entries.len();
        tier.stats.count = count;
        handle
    }

    /// Drop every cached handle without changing the active archive
    pub fn clear(&self) {
        let mut tier = self.lock();
        tier.entries.clear();
        tier.stats.count = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tier = self.lock();
        f.debug_struct("BlobCache")
            .field("archive", &tier.archive)
            .field("count", &tier.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = BlobCache::new(8);
        let archive = ArchiveId::new();
        cache.switch_archive(archive);

        assert!(cache.get(archive, "-/s/style.css").is_none());
        let handle = cache.insert(archive, "-/s/style.css", "text/css", Bytes::from_static(b"a{}"));
        let hit = cache.get(archive, "-/s/style.css").unwrap();

        assert_eq!(hit.id, handle.id);
        assert!(hit.url().starts_with("blob:zimview/"));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.count), (1, 1, 1));
    }

    #[test]
    fn test_switch_archive_resets() {
        let cache = BlobCache::new(8);
        let first = ArchiveId::new();
        cache.switch_archive(first);
        cache.insert(first, "-/s/style.css", "text/css", Bytes::new());

        let second = ArchiveId::new();
        cache.switch_archive(second);
        assert!(cache.is_empty());
        assert!(cache.get(first, "-/s/style.css").is_none());
        assert_eq!(cache.stats().generation, 2);

        // Re-selecting the same archive keeps entries.
        cache.insert(second, "-/s/style.css", "text/css", Bytes::new());
        cache.switch_archive(second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stale_insert_not_cached() {
        let cache = BlobCache::new(8);
        let old = ArchiveId::new();
        let new = ArchiveId::new();
        cache.switch_archive(new);

        let handle = cache.insert(old, "-/s/style.css", "text/css", Bytes::from_static(b"x"));
        assert_eq!(&handle.content[..], b"x");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = BlobCache::new(2);
        let archive = ArchiveId::new();
        cache.switch_archive(archive);
        cache.insert(archive, "a", "text/css", Bytes::new());
        cache.insert(archive, "b", "text/css", Bytes::new());
        cache.insert(archive, "c", "text/css", Bytes::new());

        assert!(cache.get(archive, "a").is_none());
        assert!(cache.get(archive, "c").is_some());
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            count: 10,
            generation: 1,
        };
        assert!((stats.hit_rate() - 75.0).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
