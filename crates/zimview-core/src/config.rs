//! Viewer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zimview_common::{Result, ViewerError};

use crate::types::{ImageDisplay, InjectionMode};

/// How the controller answers requests that hit a redirect entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectPolicy {
    /// Every redirect becomes an HTTP redirect, so the browser always knows
    /// the final URL.
    #[default]
    Always,
    /// Same-directory redirects are answered with the target content; only
    /// redirects that change directory become HTTP redirects.
    CrossDirectory,
}

/// Viewer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Application version, part of the persistent cache name
    pub app_version: String,

    /// Persistent cache name prefix
    pub cache_prefix: String,

    /// Directory for the on-disk persistent tier; in memory when unset
    pub cache_dir: Option<PathBuf>,

    /// Interval between keep-alive handshakes, in milliseconds
    pub keep_alive_interval_ms: u64,

    /// How long the interceptor waits for a content reply, in milliseconds
    pub reply_timeout_ms: u64,

    /// Image handling in displayed pages
    pub image_display: ImageDisplay,

    /// How content reaches the displayed document
    pub injection_mode: InjectionMode,

    /// Redirect answering policy
    pub redirect_policy: RedirectPolicy,

    /// Longest redirect chain followed before giving up
    pub max_redirect_hops: usize,

    /// Capacity of the in-memory blob tier
    pub blob_cache_capacity: usize,

    /// Application-shell URLs fetched into the persistent tier on install
    pub precache: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            cache_prefix: "zimview-assets".to_string(),
            cache_dir: None,
            keep_alive_interval_ms: 30_000,
            reply_timeout_ms: 10_000,
            image_display: ImageDisplay::default(),
            injection_mode: InjectionMode::default(),
            redirect_policy: RedirectPolicy::default(),
            max_redirect_hops: 16,
            blob_cache_capacity: 512,
            precache: Vec::new(),
        }
    }
}

impl ViewerConfig {
    /// Name of the persistent tier for this version
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.app_version)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await?;
        let config: Self = serde_json::from_slice(&raw).map_err(|e| {
            ViewerError::config_with_source(format!("invalid config {}", path.display()), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)
            .map_err(|e| ViewerError::config_with_source("cannot serialize config", e))?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_version.trim().is_empty() {
            return Err(ViewerError::config("app_version must not be empty"));
        }
        if self.keep_alive_interval_ms == 0 {
            return Err(ViewerError::config("keep_alive_interval_ms must be positive"));
        }
        if self.reply_timeout_ms == 0 {
            return Err(ViewerError::config("reply_timeout_ms must be positive"));
        }
        if self.blob_cache_capacity == 0 {
            return Err(ViewerError::config("blob_cache_capacity must be positive"));
        }
        Ok(())
    }
}
