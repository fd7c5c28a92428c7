//! Error types for archive access

use thiserror::Error;
use zimview_common::ViewerError;

/// Errors raised by an [`ArchiveReader`](crate::ArchiveReader).
///
/// Both variants are reported to the interceptor as a plain `NotFound`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Archive entry missing: {0}")]
    EntryMissing(String),

    #[error("Archive read failure for {path}: {reason}")]
    ReadFailure { path: String, reason: String },
}

impl ArchiveError {
    /// Create a read failure
    pub fn read_failure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ReadFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<ArchiveError> for ViewerError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::EntryMissing(path) => ViewerError::NotFound(path),
            other => ViewerError::archive_with_source("archive read failed", other),
        }
    }
}
