//! On-disk backend for the persistent tier.
//!
//! Layout: `<root>/<cache name>/<sha256(key)>.bin` holds the body and
//! `<sha256(key)>.json` its metadata. Both are written to temporary files in
//! the same directory and renamed into place, body first. The metadata
//! records the body's digest; a reader that finds metadata and body from
//! different writes treats the entry as a miss.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use crate::persistent::{CacheBackend, CachedResponse, StoredMeta};
use crate::CacheError;

/// Disk-backed persistent tier storage.
#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_paths(&self, cache: &str, key: &str) -> (PathBuf, PathBuf) {
        let digest = Sha256::digest(key.as_bytes());
        let stem = format!("{:x}", digest);
        let dir = self.root.join(cache);
        (
            dir.join(format!("{stem}.json")),
            dir.join(format!("{stem}.bin")),
        )
    }
}

/// Replace `path` with `data` through a rename, so readers see either the
/// old file or the whole new one.
async fn write_replacing(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let tmp = path.with_extension(format!(
        "{}.{}.tmp",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let (meta_path, body_path) = self.entry_paths(cache, key);

        let Some(raw_meta) = read_optional(&meta_path).await? else {
            return Ok(None);
        };
        let meta: StoredMeta = match serde_json::from_slice(&raw_meta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %meta_path.display(), error = %e, "Ignoring corrupt cache metadata");
                return Ok(None);
            }
        };
        if meta.url != key {
            return Ok(None);
        }

        // The body may have been removed or replaced since the metadata was read.
        let Some(body) = read_optional(&body_path).await? else {
            return Ok(None);
        };
        if !meta.describes(&body) {
            trace!(cache, key, "Body belongs to another write");
            return Ok(None);
        }
        Ok(Some(meta.into_response(Bytes::from(body))))
    }

    async fn put(&self, cache: &str, entry: CachedResponse) -> Result<(), CacheError> {
        let (meta_path, body_path) = self.entry_paths(cache, &entry.url);
        if let Some(dir) = meta_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let meta = serde_json::to_vec(&StoredMeta::from(&entry))?;
        write_replacing(&body_path, &entry.body).await?;
        write_replacing(&meta_path, &meta).await?;
        debug!(cache, key = %entry.url, "Wrote cache entry to disk");
        Ok(())
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError> {
        match tokio::fs::remove_dir_all(self.root.join(cache)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}
