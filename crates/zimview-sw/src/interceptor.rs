//! The interceptor: decides how each outgoing request is answered.
//!
//! ```text
//! RECEIVED ── not GET ─────────────────────────────→ PASSTHROUGH
//!    │ ─────── local scheme, not archive ──────────→ PASSTHROUGH
//!    ▼
//! CACHE_LOOKUP ── hit ─────────────────────────────→ RESPOND(cached)
//!    │ miss, not archive → NETWORK_FETCH ──────────→ RESPOND (+ cache write)
//!    │ miss, archive, no session ──────────────────→ PASSTHROUGH
//!    ▼ miss, archive
//! AWAIT_RPC ── image & suppressed ─────────────────→ RESPOND(placeholder)
//!    │ Found → RESPOND(bytes) (+ cache write for css/js)
//!    │ Redirect → RESPOND(302)
//!    └ NotFound / channel lost / timeout → RESPOND(empty error)
//! ```
//!
//! Only the persistent tier survives eviction. The capture state comes from
//! the latest `Init`, and the image mode is refreshed by every content reply.
//! A request whose port was closed under it is asked once more on the
//! session that replaced it.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, RANGE};
use http::{HeaderMap, Method, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;
use zimview_cache::PersistentCache;
use zimview_channel::{await_reply, reply_channel, ChannelError, Endpoint, Message, SessionId};
use zimview_core::{paths, ArchiveUrl, ContentReply, ContentRequest, ImageDisplay};

use crate::network::NetworkFetcher;
use crate::response;

// ==================== Fetch Event ====================

/// A request observed by the interceptor.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,
}

impl FetchEvent {
    /// A plain GET.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }
}

/// What to do with an intercepted request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Let the request continue as if not intercepted.
    Passthrough,
    /// Answer with this response.
    Respond(Response<Bytes>),
}

impl FetchDisposition {
    pub fn response(&self) -> Option<&Response<Bytes>> {
        match self {
            FetchDisposition::Respond(response) => Some(response),
            FetchDisposition::Passthrough => None,
        }
    }

    pub fn into_response(self) -> Option<Response<Bytes>> {
        match self {
            FetchDisposition::Respond(response) => Some(response),
            FetchDisposition::Passthrough => None,
        }
    }
}

// ==================== Capture State ====================

/// Unique identifier for an interceptor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

impl InterceptorId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
struct Session {
    id: SessionId,
    port: Endpoint,
    image_display: ImageDisplay,
}

#[derive(Debug, Clone)]
enum Capture {
    /// Started, no handshake yet. Archive requests pass through.
    Waiting,
    /// Archive requests go to the controller through `Session::port`.
    Active(Session),
    /// The controller switched interception off.
    Disabled,
}

// ==================== Interceptor ====================

/// One running interceptor instance.
pub struct Interceptor {
    id: InterceptorId,
    cache: PersistentCache,
    network: Arc<dyn NetworkFetcher>,
    reply_timeout: Duration,
    capture: RwLock<Capture>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl Interceptor {
    pub fn new(
        cache: PersistentCache,
        network: Arc<dyn NetworkFetcher>,
        reply_timeout: Duration,
    ) -> Self {
        let id = InterceptorId::new();
        debug!(?id, cache = %cache.name(), "Interceptor started");
        Self {
            id,
            cache,
            network,
            reply_timeout,
            capture: RwLock::new(Capture::Waiting),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> InterceptorId {
        self.id
    }

    /// Session currently used for archive requests.
    pub async fn session(&self) -> Option<SessionId> {
        match &*self.capture.read().await {
            Capture::Active(session) => Some(session.id),
            Capture::Waiting | Capture::Disabled => None,
        }
    }

    /// Image mode last reported by the controller.
    pub async fn image_display(&self) -> ImageDisplay {
        match &*self.capture.read().await {
            Capture::Active(session) => session.image_display,
            Capture::Waiting | Capture::Disabled => ImageDisplay::All,
        }
    }

    /// Handle a control message from the controller.
    pub async fn handle_message(&self, message: Message) {
        match message {
            Message::Init {
                session,
                port,
                image_display,
            } => {
                info!(interceptor = ?self.id, %session, ?image_display, "Capture enabled");
                *self.capture.write().await = Capture::Active(Session {
                    id: session,
                    port,
                    image_display,
                });
            }
            Message::Disable => {
                info!(interceptor = ?self.id, "Capture disabled");
                *self.capture.write().await = Capture::Disabled;
            }
            Message::AskForContent { request, reply } => {
                warn!(path = %request.path, "Interceptor cannot answer content requests");
                let _ = reply.send(ContentReply::NotFound);
            }
        }
    }

    /// Forget the session, as when the host stops this instance.
    pub async fn shutdown(&self) {
        *self.capture.write().await = Capture::Waiting;
    }

    /// Decide how to answer a request.
    pub async fn handle_fetch(&self, event: FetchEvent) -> FetchDisposition {
        if event.method != Method::GET {
            trace!(url = %event.url, method = %event.method, "Passthrough: not a GET");
            return FetchDisposition::Passthrough;
        }

        let archive_url = ArchiveUrl::parse(&event.url);
        if archive_url.is_none() && paths::is_local_scheme(&event.url) {
            trace!(url = %event.url, "Passthrough: local scheme");
            return FetchDisposition::Passthrough;
        }

        match self.cache.match_url(&event.url).await {
            Ok(Some(entry)) => {
                debug!(url = %event.url, "Served from cache");
                return FetchDisposition::Respond(response::cached_response(entry));
            }
            Ok(None) => {}
            Err(e) => warn!(url = %event.url, error = %e, "Cache lookup failed, treating as miss"),
        }

        let Some(archive_url) = archive_url else {
            return FetchDisposition::Respond(self.fetch_from_network(&event.url).await);
        };

        // Read after the lookup: a handshake may have landed during it.
        let Some(session) = self.active_session().await else {
            trace!(url = %event.url, "Passthrough: capture not active");
            return FetchDisposition::Passthrough;
        };
        FetchDisposition::Respond(self.fetch_from_archive(&event, archive_url, session).await)
    }

    async fn active_session(&self) -> Option<Session> {
        match &*self.capture.read().await {
            Capture::Active(session) => Some(session.clone()),
            Capture::Waiting | Capture::Disabled => None,
        }
    }

    async fn fetch_from_archive(
        &self,
        event: &FetchEvent,
        archive_url: ArchiveUrl,
        mut session: Session,
    ) -> Response<Bytes> {
        if session.image_display.suppresses_images() && paths::is_image_path(event.url.path()) {
            if let Some(placeholder) = response::placeholder_response(session.image_display) {
                trace!(url = %event.url, "Image replaced by placeholder");
                return placeholder;
            }
        }

        let request = ContentRequest::new(archive_url.archive.as_str(), archive_url.path.as_str())
            .with_ranges(event.headers.contains_key(RANGE));
        let path = request.path.clone();

        let mut outcome = self.ask(&session, request.clone()).await;
        if matches!(outcome, Err(ChannelError::ChannelLost)) {
            // The port may have been closed by a handshake that replaced it.
            if let Some(newer) = self.active_session().await.filter(|s| s.id != session.id) {
                debug!(%path, stale = %session.id, session = %newer.id, "Asking again on newer session");
                session = newer;
                outcome = self.ask(&session, request).await;
            }
        }

        match outcome {
            Ok(ContentReply::Found {
                content,
                mime_type,
                image_display,
            }) => {
                self.update_image_display(session.id, image_display).await;
                debug!(%path, %mime_type, bytes = content.len(), "Content received");
                if paths::is_cacheable_mime(&mime_type) {
                    self.spawn_cache_write(event.url.clone(), 200, mime_type.clone(), content.clone());
                }
                response::content_response(content, &mime_type)
            }
            Ok(ContentReply::Redirect { target_path }) => {
                match archive_url.location_for(&event.url, &target_path) {
                    Some(location) => {
                        debug!(%path, %location, "Redirecting");
                        response::redirect_response(&location)
                    }
                    None => {
                        warn!(%path, %target_path, "Unusable redirect target");
                        response::empty_response(StatusCode::NOT_FOUND)
                    }
                }
            }
            Ok(ContentReply::NotFound) => {
                debug!(%path, "Not in archive");
                response::empty_response(StatusCode::NOT_FOUND)
            }
            Err(ChannelError::ResolutionTimeout(timeout)) => {
                warn!(%path, ?timeout, "Content request timed out");
                response::empty_response(StatusCode::GATEWAY_TIMEOUT)
            }
            Err(e) => {
                warn!(%path, session = %session.id, error = %e, "Content request lost");
                self.drop_session(session.id).await;
                response::empty_response(StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    async fn ask(
        &self,
        session: &Session,
        request: ContentRequest,
    ) -> Result<ContentReply, ChannelError> {
        let (reply, receiver) = reply_channel();
        session.port.send(Message::AskForContent { request, reply })?;
        await_reply(receiver, self.reply_timeout).await
    }

    async fn fetch_from_network(&self, url: &Url) -> Response<Bytes> {
        match self.network.fetch(url).await {
            Ok(response) => {
                let mime_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if response.status() == StatusCode::OK && paths::is_cacheable_mime(&mime_type) {
                    self.spawn_cache_write(url.clone(), 200, mime_type, response.body().clone());
                }
                response
            }
            Err(e) => {
                debug!(%url, error = %e, "Network fetch failed");
                response::empty_response(StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    /// Write to the persistent tier without holding up the response.
    fn spawn_cache_write(&self, url: Url, status: u16, mime_type: String, body: Bytes) {
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = cache.put(&url, status, &mime_type, body).await {
                warn!(%url, error = %e, "Cache write failed");
            }
        });
        let mut pending = self
            .pending_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for cache writes started so far.
    pub async fn flush(&self) {
        let handles = std::mem::take(
            &mut *self
                .pending_writes
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn update_image_display(&self, session: SessionId, image_display: ImageDisplay) {
        if let Capture::Active(current) = &mut *self.capture.write().await {
            if current.id == session {
                current.image_display = image_display;
            }
        }
    }

    /// Forget a dead session unless a newer one already replaced it.
    async fn drop_session(&self, session: SessionId) {
        let mut capture = self.capture.write().await;
        if matches!(&*capture, Capture::Active(current) if current.id == session) {
            *capture = Capture::Waiting;
        }
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("id", &self.id)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetError, OfflineFetcher};
    use async_trait::async_trait;
    use http::header::LOCATION;
    use std::sync::atomic::AtomicUsize;
    use zimview_cache::{CacheBackend, CacheError, CachedResponse, MemoryBackend};
    use zimview_channel::ReplyPort;

    const BASE: &str = "https://viewer.local/www/wiki.zim/";

    fn url(path: &str) -> Url {
        Url::parse(BASE).unwrap().join(path).unwrap()
    }

    fn interceptor(timeout: Duration) -> Interceptor {
        Interceptor::new(
            PersistentCache::in_memory("zimview-assets", "test"),
            Arc::new(OfflineFetcher),
            timeout,
        )
    }

    /// A controller answering from a fixed table, counting requests.
    fn fake_controller(asks: Arc<AtomicUsize>) -> (Endpoint, JoinHandle<()>) {
        zimview_channel::open(move |message| {
            let asks = asks.clone();
            async move {
                let Message::AskForContent { request, reply } = message else {
                    return;
                };
                asks.fetch_add(1, Ordering::SeqCst);
                let answer = match request.path.as_str() {
                    "A/Python" => ContentReply::Found {
                        content: Bytes::from_static(b"<html>python</html>"),
                        mime_type: "text/html".to_string(),
                        image_display: ImageDisplay::All,
                    },
                    "-/style.css" => ContentReply::Found {
                        content: Bytes::from_static(b"body{}"),
                        mime_type: "text/css".to_string(),
                        image_display: ImageDisplay::All,
                    },
                    "A/Python_(programming_language)" => ContentReply::Redirect {
                        target_path: "A/Python".to_string(),
                    },
                    _ => ContentReply::NotFound,
                };
                let _ = reply.send(answer);
            }
        })
    }

    async fn init(interceptor: &Interceptor, port: Endpoint, image_display: ImageDisplay) {
        interceptor
            .handle_message(Message::Init {
                session: SessionId::new(),
                port,
                image_display,
            })
            .await;
    }

    struct CssFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NetworkFetcher for CssFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Response<Bytes>, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::builder()
                .status(200)
                .header(CONTENT_TYPE, "text/css")
                .body(Bytes::from_static(b"h1{}"))
                .unwrap())
        }
    }

    /// Memory backend whose lookups take a while.
    struct SlowLookups {
        inner: MemoryBackend,
        delay: Duration,
    }

    #[async_trait]
    impl CacheBackend for SlowLookups {
        async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(cache, key).await
        }

        async fn put(&self, cache: &str, entry: CachedResponse) -> Result<(), CacheError> {
            self.inner.put(cache, entry).await
        }

        async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError> {
            self.inner.delete_cache(cache).await
        }

        async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
            self.inner.cache_names().await
        }
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let interceptor = interceptor(Duration::from_secs(1));
        let mut event = FetchEvent::get(url("A/Python"));
        event.method = Method::POST;
        assert!(matches!(
            interceptor.handle_fetch(event).await,
            FetchDisposition::Passthrough
        ));
    }

    #[tokio::test]
    async fn test_local_scheme_passes_through() {
        let interceptor = interceptor(Duration::from_secs(1));
        let event = FetchEvent::get(Url::parse("file:///home/user/index.html").unwrap());
        assert!(matches!(
            interceptor.handle_fetch(event).await,
            FetchDisposition::Passthrough
        ));
    }

    #[tokio::test]
    async fn test_archive_passes_through_before_init() {
        let interceptor = interceptor(Duration::from_secs(1));
        assert!(interceptor.session().await.is_none());
        assert!(matches!(
            interceptor.handle_fetch(FetchEvent::get(url("A/Python"))).await,
            FetchDisposition::Passthrough
        ));
    }

    #[tokio::test]
    async fn test_cached_stylesheet_served_before_init() {
        let cache = PersistentCache::in_memory("zimview-assets", "test");
        cache
            .put(&url("-/s/style.css"), 200, "text/css", Bytes::from_static(b"p{}"))
            .await
            .unwrap();
        let interceptor = Interceptor::new(cache, Arc::new(OfflineFetcher), Duration::from_secs(1));

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("-/s/style.css")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"p{}");
        assert!(interceptor.session().await.is_none());
    }

    #[tokio::test]
    async fn test_cached_stylesheet_served_when_disabled() {
        let interceptor = interceptor(Duration::from_secs(1));
        let asks = Arc::new(AtomicUsize::new(0));
        let (port, _task) = fake_controller(asks.clone());
        init(&interceptor, port, ImageDisplay::All).await;
        interceptor.handle_fetch(FetchEvent::get(url("-/style.css"))).await;
        interceptor.flush().await;
        interceptor.handle_message(Message::Disable).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("-/style.css")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.body().as_ref(), b"body{}");
        assert_eq!(asks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_during_lookup_uses_new_session() {
        let backend = SlowLookups {
            inner: MemoryBackend::new(),
            delay: Duration::from_millis(100),
        };
        let interceptor = Arc::new(Interceptor::new(
            PersistentCache::new("zimview-assets", "test", Arc::new(backend)),
            Arc::new(OfflineFetcher),
            Duration::from_secs(1),
        ));
        let asks = Arc::new(AtomicUsize::new(0));
        let (old_port, _old_task) = fake_controller(asks.clone());
        init(&interceptor, old_port.clone(), ImageDisplay::All).await;

        let fetch = tokio::spawn({
            let interceptor = interceptor.clone();
            async move { interceptor.handle_fetch(FetchEvent::get(url("A/Python"))).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (new_port, _new_task) = fake_controller(asks.clone());
        init(&interceptor, new_port, ImageDisplay::All).await;
        old_port.close();

        let response = fetch.await.unwrap().into_response().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(asks.load(Ordering::SeqCst), 1);
        assert!(interceptor.session().await.is_some());
    }

    #[tokio::test]
    async fn test_request_lost_on_replaced_session_asked_again() {
        let interceptor = Arc::new(interceptor(Duration::from_secs(1)));
        let asks = Arc::new(AtomicUsize::new(0));
        let (new_port, _new_task) = fake_controller(asks.clone());
        let (new_session, handoff) = (SessionId::new(), Arc::new(Mutex::new(Some(new_port))));

        // Replaces the session, then drops the request it was asked.
        let target = interceptor.clone();
        let (old_port, _old_task) = zimview_channel::open(move |message| {
            let (target, handoff) = (target.clone(), handoff.clone());
            async move {
                let Message::AskForContent { reply, .. } = message else {
                    return;
                };
                let port = handoff.lock().unwrap().take();
                if let Some(port) = port {
                    target
                        .handle_message(Message::Init {
                            session: new_session,
                            port,
                            image_display: ImageDisplay::All,
                        })
                        .await;
                }
                drop(reply);
            }
        });
        init(&interceptor, old_port, ImageDisplay::All).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("A/Python")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(asks.load(Ordering::SeqCst), 1);
        assert_eq!(interceptor.session().await, Some(new_session));
    }

    #[tokio::test]
    async fn test_found_content_served() {
        let interceptor = interceptor(Duration::from_secs(1));
        let asks = Arc::new(AtomicUsize::new(0));
        let (port, _task) = fake_controller(asks.clone());
        init(&interceptor, port, ImageDisplay::All).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("A/Python")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(response.body().as_ref(), b"<html>python</html>");
        assert_eq!(asks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stylesheet_cached_after_first_fetch() {
        let interceptor = interceptor(Duration::from_secs(1));
        let asks = Arc::new(AtomicUsize::new(0));
        let (port, _task) = fake_controller(asks.clone());
        init(&interceptor, port, ImageDisplay::All).await;

        let first = interceptor
            .handle_fetch(FetchEvent::get(url("-/style.css?v=1")))
            .await;
        assert_eq!(first.response().unwrap().status(), StatusCode::OK);
        interceptor.flush().await;

        let second = interceptor
            .handle_fetch(FetchEvent::get(url("-/style.css?v=2")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(second.body().as_ref(), b"body{}");
        assert_eq!(asks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_html_not_cached() {
        let interceptor = interceptor(Duration::from_secs(1));
        let asks = Arc::new(AtomicUsize::new(0));
        let (port, _task) = fake_controller(asks.clone());
        init(&interceptor, port, ImageDisplay::All).await;

        for _ in 0..2 {
            interceptor.handle_fetch(FetchEvent::get(url("A/Python"))).await;
            interceptor.flush().await;
        }
        assert_eq!(asks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_redirect_becomes_302() {
        let interceptor = interceptor(Duration::from_secs(1));
        let (port, _task) = fake_controller(Arc::new(AtomicUsize::new(0)));
        init(&interceptor, port, ImageDisplay::All).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("A/Python_(programming_language)")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[LOCATION],
            "https://viewer.local/www/wiki.zim/A/Python"
        );
    }

    #[tokio::test]
    async fn test_missing_entry_is_404() {
        let interceptor = interceptor(Duration::from_secs(1));
        let (port, _task) = fake_controller(Arc::new(AtomicUsize::new(0)));
        init(&interceptor, port, ImageDisplay::All).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("A/Nowhere")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn test_suppressed_image_never_asks_controller() {
        let interceptor = interceptor(Duration::from_secs(1));
        let asks = Arc::new(AtomicUsize::new(0));
        let (port, _task) = fake_controller(asks.clone());
        init(&interceptor, port, ImageDisplay::None).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("I/logo.PNG")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/svg+xml");
        assert_eq!(asks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_silent_controller_times_out() {
        let interceptor = interceptor(Duration::from_millis(50));
        let held: Arc<Mutex<Vec<ReplyPort>>> = Arc::default();
        let keep = held.clone();
        let (port, _task) = zimview_channel::open(move |message| {
            let keep = keep.clone();
            async move {
                if let Message::AskForContent { reply, .. } = message {
                    keep.lock().unwrap().push(reply);
                }
            }
        });
        init(&interceptor, port, ImageDisplay::All).await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("A/Python")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(interceptor.session().await.is_some());
        assert_eq!(held.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_channel_drops_session() {
        let interceptor = interceptor(Duration::from_secs(1));
        let (port, task) = fake_controller(Arc::new(AtomicUsize::new(0)));
        init(&interceptor, port, ImageDisplay::All).await;
        task.abort();
        let _ = task.await;

        let response = interceptor
            .handle_fetch(FetchEvent::get(url("A/Python")))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(interceptor.session().await.is_none());
    }

    #[tokio::test]
    async fn test_disable_stops_capture() {
        let interceptor = interceptor(Duration::from_secs(1));
        let (port, _task) = fake_controller(Arc::new(AtomicUsize::new(0)));
        init(&interceptor, port, ImageDisplay::All).await;
        interceptor.handle_message(Message::Disable).await;

        assert!(matches!(
            interceptor.handle_fetch(FetchEvent::get(url("A/Python"))).await,
            FetchDisposition::Passthrough
        ));
    }

    #[tokio::test]
    async fn test_network_stylesheet_cached() {
        let fetcher = Arc::new(CssFetcher {
            calls: AtomicUsize::new(0),
        });
        let interceptor = Interceptor::new(
            PersistentCache::in_memory("zimview-assets", "test"),
            fetcher.clone(),
            Duration::from_secs(1),
        );
        let external = Url::parse("https://cdn.example.org/theme.css").unwrap();

        for _ in 0..2 {
            let response = interceptor
                .handle_fetch(FetchEvent::get(external.clone()))
                .await
                .into_response()
                .unwrap();
            assert_eq!(response.body().as_ref(), b"h1{}");
            interceptor.flush().await;
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_network_is_503() {
        let interceptor = interceptor(Duration::from_secs(1));
        let response = interceptor
            .handle_fetch(FetchEvent::get(
                Url::parse("https://cdn.example.org/x.js").unwrap(),
            ))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
