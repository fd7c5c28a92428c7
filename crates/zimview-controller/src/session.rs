//! Channel sessions and the keep-alive handshake.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use zimview_channel::{Endpoint, Message, SessionId};

/// The controller's side of one handshake.
///
/// Dropping the session closes its endpoint; requests already received are
/// still answered, and the server task ends once the interceptor lets go of
/// its clone of the endpoint.
pub struct ChannelSession {
    id: SessionId,
    endpoint: Endpoint,
    server: JoinHandle<()>,
    created: Instant,
}

impl ChannelSession {
    /// Open a session whose messages are handled by `on_message`.
    pub fn open<F, Fut>(on_message: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (endpoint, server) = zimview_channel::open(on_message);
        let id = SessionId::new();
        debug!(session = %id, port = ?endpoint.id(), "Session opened");
        Self {
            id,
            endpoint,
            server,
            created: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Endpoint handed to the interceptor in `Init`.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn is_serving(&self) -> bool {
        !self.server.is_finished()
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.endpoint.close();
        trace!(session = %self.id, "Session closed");
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// ==================== Keep-Alive ====================

/// Periodic re-handshake while interception is on.
///
/// The timer restarts after every served round-trip, so an active session
/// only re-handshakes once it has been quiet for a whole interval.
pub struct KeepAlive {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl KeepAlive {
    /// Run `beat` every `interval` until stopped or `beat` returns false.
    /// A notification on `rearm` restarts the interval.
    pub fn start<F, Fut>(interval: Duration, rearm: Arc<Notify>, beat: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = rearm.notified() => {
                        trace!("Keep-alive re-armed");
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !beat().await {
                            break;
                        }
                    }
                }
            }
            debug!("Keep-alive stopped");
        });

        Self {
            stop: Some(stop_tx),
            task,
        }
    }

    /// False once stopped or once `beat` gave up.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
