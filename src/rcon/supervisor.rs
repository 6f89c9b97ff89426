//! Connection lifecycle supervisor.
//!
//! Owns the single logical connection of a client. `connect()` is idempotent:
//! every caller attaches to the same in-flight or open connection, so no
//! duplicate sockets are ever opened.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Open
//!       ▲                         │                 │
//!       │                       close             close
//!       │                         ▼                 ▼
//!       └──── shutdown() ──── ReconnectScheduled ◄──┘
//!                                 │
//!                     delay elapsed or connect()
//!                                 ▼
//!                             Connecting
//! ```
//!
//! Each connection instance is an *epoch*. A closed epoch is discarded and
//! never reused; the next `connect()` starts a fresh one. Reconnects are
//! retried forever at a fixed delay until `shutdown()` or the last client
//! handle is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::error::RconError;
use super::transport::{Transport, TransportLink};

/// Default fixed delay before an automatic reconnect.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Observable state of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    ReconnectScheduled,
}

/// Sending half of one open connection epoch.
#[derive(Debug, Clone)]
pub struct Link {
    epoch: u64,
    outbound: mpsc::UnboundedSender<String>,
}

impl Link {
    /// Epoch this link belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue a text frame for the server.
    pub fn send(&self, frame: String) -> Result<(), RconError> {
        self.outbound.send(frame).map_err(|_| {
            RconError::Connection("Connection closed before the frame was sent".to_string())
        })
    }
}

/// Callbacks from the connection driver.
///
/// Invoked on the driver task; implementations must not block.
pub(crate) trait LinkEvents: Send + Sync {
    /// A new epoch opened. Runs before waiters in `connect()` are released.
    fn on_open(&self, link: &Link);
    /// A text frame arrived.
    fn on_frame(&self, raw: &str);
    /// The epoch's socket closed.
    fn on_close(&self, epoch: u64, reason: &RconError);
}

#[derive(Debug, Clone)]
enum EpochStatus {
    Connecting,
    Open(Link),
    Closed(RconError),
}

struct Epoch {
    id: u64,
    status: watch::Sender<EpochStatus>,
}

#[derive(Default)]
struct State {
    current: Option<Arc<Epoch>>,
    reconnect: Option<CancellationToken>,
    last_epoch: u64,
}

struct Inner {
    url: Url,
    transport: Arc<dyn Transport>,
    events: Weak<dyn LinkEvents>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Supervisor for the client's single logical connection.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        url: Url,
        transport: Arc<dyn Transport>,
        events: Weak<dyn LinkEvents>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url,
                transport,
                events,
                reconnect_delay,
                shutdown: CancellationToken::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Endpoint this supervisor connects to.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Ensure the connection is open.
    ///
    /// Cancels any scheduled reconnect, then joins the in-flight or open
    /// epoch, starting a new one if there is none.
    ///
    /// # Errors
    ///
    /// - `RconError::Connection` if the socket closes before opening
    /// - `RconError::Shutdown` after `shutdown()`
    pub async fn connect(&self) -> Result<Link, RconError> {
        let mut status = self.inner.attach()?;

        loop {
            let current = status.borrow_and_update().clone();
            match current {
                EpochStatus::Open(link) => return Ok(link),
                EpochStatus::Closed(reason) => return Err(reason),
                EpochStatus::Connecting => {}
            }

            if status.changed().await.is_err() {
                return Err(RconError::Connection(
                    "Connection attempt abandoned".to_string(),
                ));
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        let state = self.inner.lock_state();

        if let Some(epoch) = &state.current {
            return match &*epoch.status.borrow() {
                EpochStatus::Connecting => ConnectionState::Connecting,
                EpochStatus::Open(_) => ConnectionState::Open,
                EpochStatus::Closed(_) => ConnectionState::Disconnected,
            };
        }

        match &state.reconnect {
            Some(timer) if !timer.is_cancelled() => ConnectionState::ReconnectScheduled,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Tear down: cancel the reconnect timer and close the live socket.
    ///
    /// Every later `connect()` fails with `RconError::Shutdown`.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        self.inner.shutdown.cancel();
        state.reconnect = None;
        info!(url = %self.inner.url, "Connection supervisor shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the current epoch or start a new one.
    fn attach(self: &Arc<Self>) -> Result<watch::Receiver<EpochStatus>, RconError> {
        let mut state = self.lock_state();

        if let Some(timer) = state.reconnect.take() {
            timer.cancel();
            debug!("Cancelled scheduled reconnect");
        }

        if self.shutdown.is_cancelled() {
            return Err(RconError::Shutdown);
        }

        if let Some(epoch) = &state.current {
            return Ok(epoch.status.subscribe());
        }

        state.last_epoch += 1;
        let (status, receiver) = watch::channel(EpochStatus::Connecting);
        let epoch = Arc::new(Epoch {
            id: state.last_epoch,
            status,
        });
        state.current = Some(Arc::clone(&epoch));

        tokio::spawn(drive(
            Arc::downgrade(self),
            epoch,
            Arc::clone(&self.transport),
            self.url.clone(),
            self.events.clone(),
            self.shutdown.clone(),
        ));

        Ok(receiver)
    }

    /// Clear a finished epoch and arm the reconnect timer.
    fn closed(self: &Arc<Self>, epoch: u64, reason: &RconError) {
        let mut state = self.lock_state();

        match &state.current {
            Some(current) if current.id == epoch => state.current = None,
            _ => return,
        }

        if self.shutdown.is_cancelled() {
            debug!(epoch, "Connection closed after shutdown");
            return;
        }

        let timer = self.shutdown.child_token();
        if let Some(previous) = state.reconnect.replace(timer.clone()) {
            previous.cancel();
        }

        info!(
            epoch,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            reason = %reason,
            "Connection lost, reconnect scheduled"
        );

        tokio::spawn(reconnect_after(
            Arc::downgrade(self),
            timer,
            self.reconnect_delay,
        ));
    }
}

/// Run one connection epoch from open to close.
async fn drive(
    inner: Weak<Inner>,
    epoch: Arc<Epoch>,
    transport: Arc<dyn Transport>,
    url: Url,
    events: Weak<dyn LinkEvents>,
    shutdown: CancellationToken,
) {
    info!(url = %url, epoch = epoch.id, "Opening connection");

    let opened = tokio::select! {
        _ = shutdown.cancelled() => Err(RconError::Shutdown),
        result = transport.open(&url) => result,
    };

    let reason = match opened {
        Ok(TransportLink {
            outbound,
            mut inbound,
        }) => {
            let link = Link {
                epoch: epoch.id,
                outbound,
            };
            if let Some(events) = events.upgrade() {
                events.on_open(&link);
            }
            epoch.status.send_replace(EpochStatus::Open(link));
            info!(url = %url, epoch = epoch.id, "Connection open");

            let reason = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break RconError::Shutdown,
                    frame = inbound.recv() => match (frame, events.upgrade()) {
                        (Some(raw), Some(events)) => events.on_frame(&raw),
                        (Some(_), None) => break RconError::Shutdown,
                        (None, _) => {
                            break RconError::Connection("Connection closed by server".to_string())
                        }
                    },
                }
            };

            if let Some(events) = events.upgrade() {
                events.on_close(epoch.id, &reason);
            }
            reason
        }
        Err(e) => {
            warn!(url = %url, epoch = epoch.id, error = %e, "Connection attempt failed");
            e
        }
    };

    // Replacing the status drops the last long-lived outbound sender, which
    // closes the socket.
    epoch.status.send_replace(EpochStatus::Closed(reason.clone()));

    if let Some(inner) = inner.upgrade() {
        inner.closed(epoch.id, &reason);
    }
}

/// One-shot reconnect timer.
async fn reconnect_after(inner: Weak<Inner>, timer: CancellationToken, delay: Duration) {
    tokio::select! {
        _ = timer.cancelled() => {
            debug!("Scheduled reconnect cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };

    debug!(url = %inner.url, "Reconnecting");
    if let Err(e) = inner.attach() {
        debug!(error = %e, "Reconnect skipped");
    }
}
