//! ZimView Core Library
//!
//! This crate provides the types exchanged between the controller and the
//! interceptor, archive path utilities, the archive reader interface and the
//! viewer configuration.

pub mod archive;
pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use archive::{ArchiveEntry, ArchiveReader, MemoryArchive};
pub use config::{RedirectPolicy, ViewerConfig};
pub use error::ArchiveError;
pub use paths::ArchiveUrl;
pub use types::{ArchiveId, ContentReply, ContentRequest, ImageDisplay, InjectionMode};
