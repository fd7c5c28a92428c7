//! Redirect chain resolution.

use bytes::Bytes;
use std::collections::HashSet;
use thiserror::Error;
use tracing::trace;
use zimview_core::{paths, ArchiveEntry, ArchiveError, ArchiveReader, ContentReply, ImageDisplay, RedirectPolicy};

/// Why a chain has no terminal entry.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Redirect cycle at {0}")]
    Cycle(String),

    #[error("More than {0} redirects")]
    TooManyHops(usize),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Last entry of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Found { mime_type: String, content: Bytes },
    Missing,
}

/// A fully followed redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Path the chain ended at.
    pub path: String,

    /// Redirects followed to get there.
    pub hops: usize,

    pub terminal: Terminal,
}

/// Follow redirects from `path` until content or a missing entry.
pub async fn follow_redirects(
    reader: &dyn ArchiveReader,
    path: &str,
    max_hops: usize,
) -> Result<Resolved, ResolveError> {
    let mut visited = HashSet::new();
    let mut current = path.to_string();
    let mut hops = 0;

    loop {
        if !visited.insert(current.clone()) {
            return Err(ResolveError::Cycle(current));
        }
        match reader.get_entry(&current).await? {
            ArchiveEntry::Found { mime_type, content } => {
                return Ok(Resolved {
                    path: current,
                    hops,
                    terminal: Terminal::Found { mime_type, content },
                })
            }
            ArchiveEntry::Missing => {
                return Ok(Resolved {
                    path: current,
                    hops,
                    terminal: Terminal::Missing,
                })
            }
            ArchiveEntry::Redirect { target } => {
                if hops == max_hops {
                    return Err(ResolveError::TooManyHops(max_hops));
                }
                trace!(from = %current, to = %target, "Following redirect");
                hops += 1;
                current = target;
            }
        }
    }
}

/// Reply for a request of `requested` that resolved to `resolved`.
pub fn reply_for(
    requested: &str,
    resolved: Resolved,
    policy: RedirectPolicy,
    image_display: ImageDisplay,
) -> ContentReply {
    let (mime_type, content) = match resolved.terminal {
        Terminal::Found { mime_type, content } => (mime_type, content),
        Terminal::Missing => return ContentReply::NotFound,
    };

    let inline = resolved.hops == 0
        || (policy == RedirectPolicy::CrossDirectory
            && paths::directory_of(requested) == paths::directory_of(&resolved.path));
    if inline {
        ContentReply::Found {
            content,
            mime_type,
            image_display,
        }
    } else {
        ContentReply::Redirect {
            target_path: resolved.path,
        }
    }
}
