//! # ZimView Channel
//!
//! Message passing between the foreground controller and the background
//! interceptor.
//!
//! ## Features
//!
//! - **Endpoints**: cloneable senders with an explicit closed state
//! - **Reply ports**: one-shot, per-request reply routing
//! - **Tagged messages**: `init`, `disable`, `askForContent`
//! - **Bounded waits**: `await_reply` never blocks past its timeout
//!
//! ## Architecture
//!
//! ```text
//! Controller                                  Interceptor host
//!     │                                              │
//!     ├── WorkerLink::post_message(Init{port}) ────→ │ keeps `port`
//!     │                                              │
//!     │ ◄──── port.send(AskForContent{reply}) ───────┤
//!     │                                              │
//!     └── reply.send(ContentReply) ─────────────────→ await_reply(..)
//! ```
//!
//! Content travels as `Bytes` inside `ContentReply`: moving a reply into a
//! reply port hands the buffer to the receiver without copying, and the
//! sender keeps no mutable access to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use zimview_common::ViewerError;
use zimview_core::{ContentReply, ContentRequest, ImageDisplay};

// ==================== Errors ====================

/// Channel errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The other side is gone; the caller has to re-handshake.
    #[error("Channel lost")]
    ChannelLost,

    #[error("No reply within {0:?}")]
    ResolutionTimeout(Duration),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<ChannelError> for ViewerError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::ResolutionTimeout(timeout) => ViewerError::Timeout(timeout),
            other => ViewerError::channel_with_source("channel failure", other),
        }
    }
}

// ==================== Types ====================

/// Unique identifier for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(u64);

impl PortId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unique identifier for a channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Wire action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Init,
    Disable,
    AskForContent,
    GiveContent,
    SendRedirect,
}

impl Action {
    /// Action carrying a reply. A missing entry travels as empty content.
    pub fn for_reply(reply: &ContentReply) -> Self {
        match reply {
            ContentReply::Redirect { .. } => Action::SendRedirect,
            ContentReply::Found { .. } | ContentReply::NotFound => Action::GiveContent,
        }
    }
}

// ==================== Messages ====================

/// Messages exchanged over endpoints and worker links.
#[derive(Debug)]
pub enum Message {
    /// Controller → interceptor host: start capturing and send requests to `port`.
    Init {
        session: SessionId,
        port: Endpoint,
        image_display: ImageDisplay,
    },
    /// Controller → interceptor host: stop capturing archive requests.
    Disable,
    /// Interceptor → controller: resolve `request` and answer on `reply`.
    AskForContent {
        request: ContentRequest,
        reply: ReplyPort,
    },
}

impl Message {
    pub fn action(&self) -> Action {
        match self {
            Message::Init { .. } => Action::Init,
            Message::Disable => Action::Disable,
            Message::AskForContent { .. } => Action::AskForContent,
        }
    }
}

// ==================== Endpoint ====================

/// Sending half of a channel.
///
/// Clones share the closed flag: closing one closes all of them.
#[derive(Clone)]
pub struct Endpoint {
    id: PortId,
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
}

impl Endpoint {
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Send a message.
    pub fn send(&self, message: Message) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ChannelLost);
        }
        trace!(port = ?self.id, action = ?message.action(), "Posting message");
        self.tx.send(message).map_err(|_| ChannelError::ChannelLost)
    }

    /// Close the endpoint.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(port = ?self.id, "Endpoint closed");
        }
    }

    /// Closed explicitly, or the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a channel.
#[derive(Debug)]
pub struct Inbox {
    id: PortId,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Inbox {
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Wait for the next message; `None` once every endpoint is dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Create a connected endpoint/inbox pair.
pub fn channel() -> (Endpoint, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = PortId::new();
    (
        Endpoint {
            id,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        Inbox { id, rx },
    )
}

/// Open a channel whose messages are handled by `on_message`, in arrival order.
///
/// Aborting the returned task drops the inbox, after which every clone of the
/// endpoint reports [`ChannelError::ChannelLost`].
pub fn open<F, Fut>(on_message: F) -> (Endpoint, JoinHandle<()>)
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (endpoint, mut inbox) = channel();
    let task = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            on_message(message).await;
        }
        trace!(port = ?inbox.id(), "Inbox drained");
    });
    (endpoint, task)
}

// ==================== Reply Ports ====================

/// One-shot port carried by a request; consumed by the reply.
pub struct ReplyPort {
    id: PortId,
    tx: oneshot::Sender<ContentReply>,
}

impl ReplyPort {
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Send the reply back to the exact requester.
    pub fn send(self, reply: ContentReply) -> Result<(), ChannelError> {
        trace!(port = ?self.id, action = ?Action::for_reply(&reply), "Replying");
        self.tx.send(reply).map_err(|_| ChannelError::ChannelLost)
    }
}

impl fmt::Debug for ReplyPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyPort").field("id", &self.id).finish()
    }
}

/// Receiving side of a [`ReplyPort`].
#[derive(Debug)]
pub struct ReplyReceiver {
    id: PortId,
    rx: oneshot::Receiver<ContentReply>,
}

impl ReplyReceiver {
    pub fn id(&self) -> PortId {
        self.id
    }
}

/// Create a reply port and its receiver.
pub fn reply_channel() -> (ReplyPort, ReplyReceiver) {
    let (tx, rx) = oneshot::channel();
    let id = PortId::new();
    (ReplyPort { id, tx }, ReplyReceiver { id, rx })
}

/// Wait for the reply to one request.
///
/// A dropped reply port (the controller's session was torn down) yields
/// `ChannelLost`; silence yields `ResolutionTimeout`.
pub async fn await_reply(
    receiver: ReplyReceiver,
    timeout: Duration,
) -> Result<ContentReply, ChannelError> {
    match tokio::time::timeout(timeout, receiver.rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(ChannelError::ChannelLost),
        Err(_) => {
            debug!(port = ?receiver.id, ?timeout, "Reply timed out");
            Err(ChannelError::ResolutionTimeout(timeout))
        }
    }
}

// ==================== Worker Link ====================

/// How the controller reaches the host of the interceptor.
///
/// The host may have evicted the interceptor; delivering a message starts a
/// fresh one.
#[async_trait]
pub trait WorkerLink: Send + Sync {
    async fn post_message(&self, message: Message) -> Result<(), ChannelError>;
}
