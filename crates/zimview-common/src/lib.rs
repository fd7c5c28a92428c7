//! # ZimView Common
//!
//! The error type every ZimView crate rolls its own errors into, plus
//! logging setup and a clock helper.
//!
//! Errors are grouped by the layer that raised them; `category()` gives the
//! layer name used as a structured logging field.

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod time;

pub use logging::{init_logging, Component, LogConfig, LogFormat};
pub use time::unix_millis;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for ZimView.
#[derive(Error, Debug)]
pub enum ViewerError {
    /// Controller/interceptor messaging.
    #[error("Channel error: {message}")]
    Channel {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Lookup and extraction.
    #[error("Archive error: {message}")]
    Archive {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply did not arrive in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Archive path with no entry.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// `name(message)` and `name_with_source(message, source)` for a layer variant.
macro_rules! layer_constructors {
    ($($variant:ident => $plain:ident, $sourced:ident;)*) => {
        impl ViewerError {
            $(
                pub fn $plain(message: impl Into<String>) -> Self {
                    Self::$variant {
                        message: message.into(),
                        source: None,
                    }
                }

                pub fn $sourced<E: std::error::Error + Send + Sync + 'static>(
                    message: impl Into<String>,
                    source: E,
                ) -> Self {
                    Self::$variant {
                        message: message.into(),
                        source: Some(Box::new(source)),
                    }
                }
            )*
        }
    };
}

layer_constructors! {
    Channel => channel, channel_with_source;
    Archive => archive, archive_with_source;
    Cache => cache, cache_with_source;
    Network => network, network_with_source;
    Config => config, config_with_source;
}

impl ViewerError {
    /// Whether a fresh handshake may make the same request succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ViewerError::Channel { .. }
                | ViewerError::Network { .. }
                | ViewerError::Timeout(_)
                | ViewerError::Io(_)
        )
    }

    /// Layer name for logging.
    pub fn category(&self) -> &'static str {
        match self {
            ViewerError::Channel { .. } => "channel",
            ViewerError::Archive { .. } => "archive",
            ViewerError::Cache { .. } => "cache",
            ViewerError::Network { .. } => "network",
            ViewerError::Config { .. } => "config",
            ViewerError::Io(_) => "io",
            ViewerError::Timeout(_) => "timeout",
            ViewerError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias for ZimView operations.
pub type Result<T> = std::result::Result<T, ViewerError>;
