//! Archive reader interface.
//!
//! Decompression and directory-entry lookup live outside this workspace; the
//! controller only needs to map a logical path to content, a redirect, or
//! nothing. [`MemoryArchive`] is a map-backed reader for tests and demos.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

use crate::error::ArchiveError;
use crate::types::ArchiveId;

/// Result of looking up a path in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    /// The entry exists and holds content.
    Found { mime_type: String, content: Bytes },
    /// The entry is a redirect to another path of the same archive.
    Redirect { target: String },
    /// No entry at that path.
    Missing,
}

/// Read access to an opened archive.
#[async_trait]
pub trait ArchiveReader: Send + Sync + fmt::Debug {
    /// Session id of this opened archive.
    fn id(&self) -> ArchiveId;

    /// Archive file name, as it appears in request URLs.
    fn name(&self) -> &str;

    /// Look up a `<namespace>/<url>` path. May be slow.
    async fn get_entry(&self, path: &str) -> Result<ArchiveEntry, ArchiveError>;
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    Content { mime_type: String, content: Bytes },
    Redirect(String),
    Broken(String),
}

/// In-memory archive.
#[derive(Debug)]
pub struct MemoryArchive {
    id: ArchiveId,
    name: String,
    entries: HashMap<String, MemoryEntry>,
    delays: HashMap<String, Duration>,
    reads: AtomicUsize,
}

impl MemoryArchive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ArchiveId::new(),
            name: name.into(),
            entries: HashMap::new(),
            delays: HashMap::new(),
            reads: AtomicUsize::new(0),
        }
    }

    /// Add a content entry.
    pub fn with_content(
        mut self,
        path: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        self.entries.insert(
            path.into(),
            MemoryEntry::Content {
                mime_type: mime_type.into(),
                content: content.into(),
            },
        );
        self
    }

    /// Add a redirect entry.
    pub fn with_redirect(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.entries
            .insert(path.into(), MemoryEntry::Redirect(target.into()));
        self
    }

    /// Add an entry whose extraction fails.
    pub fn with_broken(mut self, path: impl Into<String>, reason: impl Into<String>) -> Self {
        self.entries
            .insert(path.into(), MemoryEntry::Broken(reason.into()));
        self
    }

    /// Delay every lookup of `path`, simulating slow decompression.
    pub fn with_delay(mut self, path: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(path.into(), delay);
        self
    }

    /// Number of lookups served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveReader for MemoryArchive {
    fn id(&self) -> ArchiveId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn get_entry(&self, path: &str) -> Result<ArchiveEntry, ArchiveError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(path) {
            tokio::time::sleep(*delay).await;
        }

        trace!(archive = %self.name, path, "Archive lookup");
        match self.entries.get(path) {
            Some(MemoryEntry::Content { mime_type, content }) => Ok(ArchiveEntry::Found {
                mime_type: mime_type.clone(),
                content: content.clone(),
            }),
            Some(MemoryEntry::Redirect(target)) => Ok(ArchiveEntry::Redirect {
                target: target.clone(),
            }),
            Some(MemoryEntry::Broken(reason)) => Err(ArchiveError::read_failure(path, reason.clone())),
            None => Ok(ArchiveEntry::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryArchive {
        MemoryArchive::new("wiki.zim")
            .with_content("A/Python", "text/html", "<html></html>")
            .with_redirect("A/Python_(programming_language)", "A/Python")
            .with_broken("I/corrupt.png", "bad cluster")
    }

    #[tokio::test]
    async fn test_lookup_kinds() {
        let archive = sample();

        assert!(matches!(
            archive.get_entry("A/Python").await,
            Ok(ArchiveEntry::Found { ref mime_type, .. }) if mime_type == "text/html"
        ));
        assert_eq!(
            archive.get_entry("A/Python_(programming_language)").await,
            Ok(ArchiveEntry::Redirect {
                target: "A/Python".to_string()
            })
        );
        assert_eq!(archive.get_entry("A/Nope").await, Ok(ArchiveEntry::Missing));
        assert!(matches!(
            archive.get_entry("I/corrupt.png").await,
            Err(ArchiveError::ReadFailure { .. })
        ));
        assert_eq!(archive.reads(), 4);
    }

    #[tokio::test]
    async fn test_paths_are_case_sensitive() {
        let archive = sample();
        assert_eq!(archive.get_entry("A/python").await, Ok(ArchiveEntry::Missing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_lookup() {
        let archive = sample().with_delay("A/Python", Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        archive.get_entry("A/Python").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
