//! Types exchanged between the controller and the interceptor

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a loaded archive.
///
/// A fresh id is minted every time an archive is opened, so reopening the
/// same file starts a new cache session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveId(pub u64);

impl ArchiveId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ArchiveId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archive-{}", self.0)
    }
}

/// How images inside displayed pages are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDisplay {
    /// Images are fetched from the archive like any other asset.
    #[default]
    All,
    /// Images are replaced by a light-blue placeholder until the user asks for them.
    Manual,
    /// Images are replaced by an empty placeholder.
    None,
}

impl ImageDisplay {
    /// Whether image requests should be answered by a placeholder.
    pub fn suppresses_images(self) -> bool {
        !matches!(self, ImageDisplay::All)
    }
}

/// How archive content reaches the displayed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionMode {
    /// Resource requests are intercepted and answered over the RPC channel.
    #[default]
    Interceptor,
    /// The controller renders pages itself and no requests are intercepted.
    Direct,
}

/// A request for archive content, sent from the interceptor to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequest {
    /// Archive file name taken from the request URL.
    pub archive: String,
    /// Namespace + url, decoded once, no query or fragment.
    pub path: String,
    /// The requester sent a `Range` header.
    pub accept_ranges: bool,
    /// MIME type guessed from the path extension.
    pub mime_hint: Option<String>,
}

impl ContentRequest {
    pub fn new(archive: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let mime_hint = mime_guess::from_path(&path).first().map(|m| m.to_string());
        Self {
            archive: archive.into(),
            path,
            accept_ranges: false,
            mime_hint,
        }
    }

    pub fn with_ranges(mut self, accept_ranges: bool) -> Self {
        self.accept_ranges = accept_ranges;
        self
    }
}

/// The controller's answer to a [`ContentRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentReply {
    Found {
        content: Bytes,
        mime_type: String,
        image_display: ImageDisplay,
    },
    Redirect {
        target_path: String,
    },
    NotFound,
}

impl ContentReply {
    pub fn is_found(&self) -> bool {
        matches!(self, ContentReply::Found { .. })
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentReply::Found { .. } => "found",
            ContentReply::Redirect { .. } => "redirect",
            ContentReply::NotFound => "not_found",
        }
    }
}
