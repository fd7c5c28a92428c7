//! # ZimView Controller
//!
//! The foreground side of content delivery. It owns the open archive,
//! answers the interceptor's content requests over a channel session and
//! keeps that session alive while interception is on. With interception
//! off, pages are rendered directly and their stylesheets resolved through
//! the blob tier.
//!
//! ## Session lifecycle
//!
//! ```text
//!   Direct ──set_injection_mode(Interceptor)──→ Interceptor
//!     ▲          new session, Init, keep-alive       │
//!     │                                              │ every quiet interval:
//!     └──set_injection_mode(Direct)─── Disable ──────┤ new session, Init
//!                                                    │
//!                                  load_archive ─────┘ new session, Init
//! ```

pub mod resolver;
pub mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, trace, warn};
use zimview_assets::{BlockTransform, IdentityTransform, StylesheetPipeline};
use zimview_cache::{BlobCache, CacheStats};
use zimview_channel::{Message, SessionId, WorkerLink};
use zimview_common::{Result, ViewerError};
use zimview_core::{ArchiveReader, ContentReply, ContentRequest, ImageDisplay, InjectionMode, ViewerConfig};

pub use resolver::{follow_redirects, reply_for, ResolveError, Resolved, Terminal};
pub use session::{ChannelSession, KeepAlive};

/// A page rendered without the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// Path of the page after following redirects.
    pub path: String,
    pub mime_type: String,
    pub html: String,
}

struct State {
    mode: InjectionMode,
    image_display: ImageDisplay,
    session: Option<ChannelSession>,
    keep_alive: Option<KeepAlive>,
}

struct Inner {
    config: ViewerConfig,
    link: Arc<dyn WorkerLink>,
    archive: RwLock<Option<Arc<dyn ArchiveReader>>>,
    blobs: Arc<BlobCache>,
    state: Mutex<State>,
    rearm: Arc<Notify>,
    handshakes: AtomicU64,
    served: AtomicU64,
}

/// Foreground controller.
///
/// Cheap to clone; clones share the archive, the session and the blob tier.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(config: ViewerConfig, link: Arc<dyn WorkerLink>) -> Self {
        let blobs = Arc::new(BlobCache::new(config.blob_cache_capacity));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    mode: InjectionMode::Direct,
                    image_display: config.image_display,
                    session: None,
                    keep_alive: None,
                }),
                config,
                link,
                archive: RwLock::new(None),
                blobs,
                rearm: Arc::new(Notify::new()),
                handshakes: AtomicU64::new(0),
                served: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.inner.config
    }

    // ==================== Archive ====================

    /// Make `reader` the active archive.
    ///
    /// Every blob of the previous archive is dropped. With interception on,
    /// the interceptor gets a fresh session.
    pub async fn load_archive(&self, reader: Arc<dyn ArchiveReader>) -> Result<()> {
        info!(archive = %reader.name(), id = %reader.id(), "Loading archive");
        self.inner.blobs.switch_archive(reader.id());
        *self.inner.archive.write().await = Some(reader);

        let mut state = self.inner.state.lock().await;
        if state.mode == InjectionMode::Interceptor {
            self.handshake(&mut state).await?;
        }
        Ok(())
    }

    pub async fn archive(&self) -> Option<Arc<dyn ArchiveReader>> {
        self.inner.archive.read().await.clone()
    }

    pub fn blob_stats(&self) -> CacheStats {
        self.inner.blobs.stats()
    }

    // ==================== Content Resolution ====================

    /// Answer one content request.
    ///
    /// Never fails: archive errors, redirect cycles and requests for another
    /// archive are logged and answered with `NotFound`.
    pub async fn resolve(&self, request: &ContentRequest) -> ContentReply {
        let Some(reader) = self.archive().await else {
            debug!(path = %request.path, "No archive loaded");
            return ContentReply::NotFound;
        };
        if request.archive != reader.name() {
            warn!(requested = %request.archive, loaded = %reader.name(), "Request for another archive");
            return ContentReply::NotFound;
        }

        let resolved = match follow_redirects(
            reader.as_ref(),
            &request.path,
            self.inner.config.max_redirect_hops,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(path = %request.path, error = %e, "Content unavailable");
                return ContentReply::NotFound;
            }
        };

        let image_display = self.inner.state.lock().await.image_display;
        let reply = reply_for(
            &request.path,
            resolved,
            self.inner.config.redirect_policy,
            image_display,
        );
        debug!(path = %request.path, reply = reply.kind(), "Resolved");
        reply
    }

    // ==================== Direct Rendering ====================

    /// Render a page without the interceptor.
    pub async fn render_page(&self, path: &str) -> Result<RenderedPage> {
        self.render_page_with(path, IdentityTransform).await
    }

    /// Like [`Controller::render_page`], with a theme transform on the stylesheets.
    pub async fn render_page_with(
        &self,
        path: &str,
        transform: impl BlockTransform + 'static,
    ) -> Result<RenderedPage> {
        let reader = self
            .archive()
            .await
            .ok_or_else(|| ViewerError::archive("no archive loaded"))?;

        let resolved = follow_redirects(reader.as_ref(), path, self.inner.config.max_redirect_hops)
            .await
            .map_err(|e| match e {
                ResolveError::Archive(e) => ViewerError::from(e),
                other => ViewerError::archive_with_source(format!("cannot render {path}"), other),
            })?;
        let (mime_type, content) = match resolved.terminal {
            Terminal::Found { mime_type, content } => (mime_type, content),
            Terminal::Missing => return Err(ViewerError::NotFound(resolved.path)),
        };

        let page = String::from_utf8_lossy(&content);
        let html = self
            .pipeline(reader)
            .with_transform(transform)
            .resolve_stylesheets(&resolved.path, &page)
            .await;
        info!(path, rendered = %resolved.path, bytes = html.len(), "Page rendered");
        Ok(RenderedPage {
            path: resolved.path,
            mime_type,
            html,
        })
    }

    fn pipeline(&self, reader: Arc<dyn ArchiveReader>) -> StylesheetPipeline {
        StylesheetPipeline::new(reader, self.inner.blobs.clone())
    }

    // ==================== Injection Mode ====================

    pub async fn injection_mode(&self) -> InjectionMode {
        self.inner.state.lock().await.mode
    }

    /// Switch how content reaches the displayed document.
    ///
    /// Turning interception on starts the keep-alive and opens a fresh
    /// session; turning it off disables capture and drops the session. A
    /// failed handshake is reported, and the keep-alive tries again on its
    /// next beat.
    pub async fn set_injection_mode(&self, mode: InjectionMode) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match mode {
            InjectionMode::Interceptor => {
                state.mode = InjectionMode::Interceptor;
                if !state.keep_alive.as_ref().is_some_and(KeepAlive::is_running) {
                    state.keep_alive = Some(self.start_keep_alive());
                }
                self.handshake(&mut state).await?;
            }
            InjectionMode::Direct => {
                state.mode = InjectionMode::Direct;
                if let Some(keep_alive) = state.keep_alive.take() {
                    keep_alive.stop();
                }
                let result = self.inner.link.post_message(Message::Disable).await;
                state.session = None;
                result?;
                info!("Interception disabled");
            }
        }
        Ok(())
    }

    /// Change image handling; with interception on, the interceptor is told
    /// through a fresh handshake.
    pub async fn set_image_display(&self, image_display: ImageDisplay) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.image_display = image_display;
        if state.mode == InjectionMode::Interceptor {
            self.handshake(&mut state).await?;
        }
        Ok(())
    }

    /// Current session, if interception is on.
    pub async fn session(&self) -> Option<SessionId> {
        self.inner.state.lock().await.session.as_ref().map(ChannelSession::id)
    }

    /// Handshakes sent so far.
    pub fn handshakes(&self) -> u64 {
        self.inner.handshakes.load(Ordering::Relaxed)
    }

    /// Content requests answered over the channel so far.
    pub fn served(&self) -> u64 {
        self.inner.served.load(Ordering::Relaxed)
    }

    /// Send `Init` with a fresh session, replacing the current one.
    async fn handshake(&self, state: &mut State) -> Result<()> {
        let session = ChannelSession::open(serve(Arc::downgrade(&self.inner)));
        let id = session.id();
        self.inner
            .link
            .post_message(Message::Init {
                session: id,
                port: session.endpoint(),
                image_display: state.image_display,
            })
            .await?;

        if let Some(old) = state.session.replace(session) {
            trace!(session = %old.id(), age = ?old.age(), serving = old.is_serving(), "Session replaced");
        }
        let count = self.inner.handshakes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session = %id, handshakes = count, "Handshake sent");
        Ok(())
    }

    fn start_keep_alive(&self) -> KeepAlive {
        let weak = Arc::downgrade(&self.inner);
        KeepAlive::start(
            self.inner.config.keep_alive_interval(),
            self.inner.rearm.clone(),
            move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return false;
                    };
                    let controller = Controller { inner };
                    let mut state = controller.inner.state.lock().await;
                    if state.mode != InjectionMode::Interceptor {
                        return false;
                    }
                    if let Err(e) = controller.handshake(&mut state).await {
                        warn!(error = %e, "Keep-alive handshake failed");
                    }
                    true
                }
            },
        )
    }
}

/// Message handler for one session.
fn serve(
    inner: Weak<Inner>,
) -> impl Fn(Message) -> std::future::Ready<()> + Send + Sync + 'static {
    move |message| {
        match message {
            Message::AskForContent { request, reply } => match inner.upgrade() {
                Some(inner) => {
                    tokio::spawn(async move {
                        let controller = Controller { inner };
                        let answer = controller.resolve(&request).await;
                        if reply.send(answer).is_ok() {
                            controller.inner.served.fetch_add(1, Ordering::Relaxed);
                            controller.inner.rearm.notify_one();
                        } else {
                            debug!(path = %request.path, "Requester went away");
                        }
                    });
                }
                None => {
                    let _ = reply.send(ContentReply::NotFound);
                }
            },
            other => warn!(action = ?other.action(), "Unexpected message on session"),
        }
        std::future::ready(())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("handshakes", &self.handshakes())
            .field("served", &self.served())
            .finish()
    }
}
