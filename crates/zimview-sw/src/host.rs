//! Lifecycle of the interceptor as the host platform sees it.

use async_trait::async_trait;
use http::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;
use zimview_cache::{DiskBackend, PersistentCache};
use zimview_channel::{ChannelError, Message, WorkerLink};
use zimview_common::{Result, ViewerError};
use zimview_core::ViewerConfig;

use crate::interceptor::{FetchDisposition, FetchEvent, Interceptor};
use crate::network::NetworkFetcher;

/// Starts interceptors on demand and evicts them at will.
///
/// The persistent tier belongs to the host and outlives every interceptor;
/// everything else is lost on [`InterceptorHost::evict`].
pub struct InterceptorHost {
    cache: PersistentCache,
    network: Arc<dyn NetworkFetcher>,
    reply_timeout: Duration,
    precache: Vec<Url>,
    current: RwLock<Option<Arc<Interceptor>>>,
    starts: AtomicU64,
}

impl InterceptorHost {
    pub fn new(
        cache: PersistentCache,
        network: Arc<dyn NetworkFetcher>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            network,
            reply_timeout,
            precache: Vec::new(),
            current: RwLock::new(None),
            starts: AtomicU64::new(0),
        }
    }

    /// Build a host from configuration; precache entries are resolved
    /// against `app_base`.
    pub fn from_config(
        config: &ViewerConfig,
        app_base: &Url,
        network: Arc<dyn NetworkFetcher>,
    ) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => PersistentCache::new(
                &config.cache_prefix,
                &config.app_version,
                Arc::new(DiskBackend::new(dir)),
            ),
            None => PersistentCache::in_memory(&config.cache_prefix, &config.app_version),
        };

        let precache = config
            .precache
            .iter()
            .map(|entry| {
                app_base.join(entry).map_err(|e| {
                    ViewerError::config_with_source(format!("invalid precache entry {entry}"), e)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(cache, network, config.reply_timeout()).with_precache(precache))
    }

    pub fn with_precache(mut self, urls: Vec<Url>) -> Self {
        self.precache = urls;
        self
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.cache
    }

    /// The running interceptor, started if there is none.
    pub async fn interceptor(&self) -> Arc<Interceptor> {
        if let Some(running) = self.current.read().await.as_ref() {
            return running.clone();
        }

        let mut current = self.current.write().await;
        if let Some(running) = current.as_ref() {
            return running.clone();
        }
        let started = Arc::new(Interceptor::new(
            self.cache.clone(),
            self.network.clone(),
            self.reply_timeout,
        ));
        let starts = self.starts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(interceptor = ?started.id(), starts, "Interceptor started by host");
        *current = Some(started.clone());
        started
    }

    /// Route a request through the interceptor.
    pub async fn fetch(&self, event: FetchEvent) -> FetchDisposition {
        self.interceptor().await.handle_fetch(event).await
    }

    /// Stop the interceptor and drop its in-memory state.
    pub async fn evict(&self) {
        if let Some(evicted) = self.current.write().await.take() {
            evicted.shutdown().await;
            info!(interceptor = ?evicted.id(), "Interceptor evicted");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// How many interceptors have been started so far.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    /// Wait for cache writes of the running interceptor.
    pub async fn flush(&self) {
        let running = self.current.read().await.clone();
        if let Some(running) = running {
            running.flush().await;
        }
    }

    /// Fetch the application shell into the persistent tier.
    ///
    /// Fails if any entry cannot be fetched, leaving the version uninstalled.
    pub async fn install(&self) -> Result<usize> {
        for url in &self.precache {
            let response = self.network.fetch(url).await?;
            if response.status() != StatusCode::OK {
                return Err(ViewerError::network(format!(
                    "precache {url} returned {}",
                    response.status()
                )));
            }
            let mime_type = response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(mime::APPLICATION_OCTET_STREAM.as_ref())
                .to_string();
            self.cache
                .put(url, StatusCode::OK.as_u16(), &mime_type, response.into_body())
                .await?;
            debug!(%url, "Precached");
        }
        info!(cache = %self.cache.name(), entries = self.precache.len(), "Install complete");
        Ok(self.precache.len())
    }

    /// Take over from older versions by deleting their caches.
    pub async fn activate(&self) -> Result<usize> {
        let purged = self.cache.purge_stale().await?;
        if purged > 0 {
            info!(purged, cache = %self.cache.name(), "Activated, stale caches removed");
        }
        Ok(purged)
    }
}

#[async_trait]
impl WorkerLink for InterceptorHost {
    async fn post_message(&self, message: Message) -> std::result::Result<(), ChannelError> {
        let interceptor = self.interceptor().await;
        if let Message::AskForContent { .. } = &message {
            warn!("Host received a content request meant for the controller");
        }
        interceptor.handle_message(message).await;
        Ok(())
    }
}

impl std::fmt::Debug for InterceptorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorHost")
            .field("cache", &self.cache)
            .field("precache", &self.precache.len())
            .field("starts", &self.starts())
            .finish()
    }
}
