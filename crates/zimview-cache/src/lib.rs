//! # ZimView Cache
//!
//! The two cache tiers used when serving archive content.
//!
//! ```text
//! PersistentCache ("<prefix>-<app version>")     survives interceptor eviction
//!     └── CacheBackend (memory | disk)
//!             └── request URL (query stripped) → CachedResponse
//!
//! BlobCache                                       reset on archive switch
//!     └── (ArchiveId, path) → BlobHandle
//! ```

use thiserror::Error;
use zimview_common::ViewerError;

pub mod blob;
pub mod disk;
pub mod persistent;

pub use blob::{BlobCache, BlobHandle, BlobId, CacheStats};
pub use disk::DiskBackend;
pub use persistent::{CacheBackend, CachedResponse, MemoryBackend, PersistentCache};

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CacheError> for ViewerError {
    fn from(err: CacheError) -> Self {
        ViewerError::cache_with_source("cache operation failed", err)
    }
}
