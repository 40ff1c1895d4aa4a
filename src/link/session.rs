//! Link Session
//!
//! Single responsibility: Own the connection state machine of one link and
//! the lifecycle of its worker task.
//!
//! # Execution contexts
//!
//! ```text
//! owner ──Control──► lifecycle task ──WorkerCommand──► worker task ──► TcpStream
//!                        (one per session)               (one per connection)
//!                                                             │
//!   LinkEventSink ◄───────────── LinkEvent ───────────────────┘
//! ```
//!
//! - The owner never touches the socket. Every request goes through one
//!   ordered queue, so a `write` issued before `disconnect` is written first.
//! - The lifecycle task never runs two workers. A new worker is spawned only
//!   after the previous one has been joined.
//! - All events come from the worker, in order. `Disconnected` is the last
//!   event a worker emits.
//!
//! # State machine
//!
//! | From          | Trigger                 | To            |
//! |---------------|-------------------------|---------------|
//! | Idle          | `connect()`             | Connecting    |
//! | Connecting    | handshake completes     | Connected     |
//! | Connecting    | error or timeout        | Idle          |
//! | Connected     | `disconnect()`, peer EOF, fatal error | Disconnecting → Idle |
//!
//! Dropping a [`LinkSession`] closes its request queue. The lifecycle task
//! then runs the disconnect sequence and clears the configuration binding,
//! so an abandoned session never leaks a socket or a task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use super::configuration::{SessionBinding, SharedLinkConfiguration};
use super::events::{LinkEvent, LinkEventSink};
use super::rate::RateAccumulator;
use super::worker::{ConnectTarget, WorkerCommand, WorkerHandle};
use crate::error::{LinkError, Result};

/// Longest a connect attempt may block the worker.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Declared capacity of a TCP link, bits/sec (54 Mbit).
pub const TCP_LINK_SPEED_BPS: u64 = 54_000_000;

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Identity of one session, used for the configuration binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on one connect attempt
    pub connect_timeout: Duration,
    /// Log a hex/ascii dump of every write at debug level
    pub dump_writes: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dump_writes: false,
        }
    }
}

/// Requests from the owner (or a configuration) to the lifecycle task.
pub(crate) enum Control {
    Connect { reply: oneshot::Sender<bool> },
    Disconnect { done: oneshot::Sender<()> },
    Restart { done: Option<oneshot::Sender<()>> },
    Write(Bytes),
    Flush { done: oneshot::Sender<()> },
}

/// State visible to the owner, the lifecycle task and the worker.
pub(crate) struct LinkShared {
    pub(crate) options: SessionOptions,
    pub(crate) in_rate: RateAccumulator,
    pub(crate) out_rate: RateAccumulator,
    state: watch::Sender<ConnectionState>,
    sink: Box<dyn LinkEventSink>,
}

impl LinkShared {
    fn new(options: SessionOptions, sink: Box<dyn LinkEventSink>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            options,
            in_rate: RateAccumulator::new(),
            out_rate: RateAccumulator::new(),
            state,
            sink,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            trace!(from = %previous, to = %next, "Link state changed");
        }
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        self.sink.on_event(event);
    }
}

/// A live link: owns the connection state machine and its worker task.
///
/// Lifecycle operations are `async` and return once the request has been
/// carried out on the lifecycle task. They never block a thread.
pub struct LinkSession {
    id: SessionId,
    config: SharedLinkConfiguration,
    shared: Arc<LinkShared>,
    control: mpsc::UnboundedSender<Control>,
    lifecycle: JoinHandle<()>,
}

impl LinkSession {
    /// Create an idle session bound to `config`.
    pub async fn new(config: SharedLinkConfiguration, sink: impl LinkEventSink) -> Self {
        Self::with_options(config, sink, SessionOptions::default()).await
    }

    pub async fn with_options(
        config: SharedLinkConfiguration,
        sink: impl LinkEventSink,
        options: SessionOptions,
    ) -> Self {
        let id = SessionId::new();
        let (control, requests) = mpsc::unbounded_channel();

        {
            let mut config = config.write().await;
            config.bind(SessionBinding {
                id,
                control: control.downgrade(),
            });
            info!(link = %config.name(), session = %id, "Link session created");
        }

        let shared = Arc::new(LinkShared::new(options, Box::new(sink)));
        let lifecycle = Lifecycle {
            id,
            config: Arc::clone(&config),
            shared: Arc::clone(&shared),
            worker: None,
        };
        let lifecycle = tokio::spawn(lifecycle.run(requests));

        Self {
            id,
            config,
            shared,
            control,
            lifecycle,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SharedLinkConfiguration {
        &self.config
    }

    /// Start a connection attempt.
    ///
    /// Returns `true` if an attempt was started. The outcome arrives as a
    /// `Connected` or `CommunicationError` event. Returns `false` when the
    /// link is already connecting or connected.
    pub async fn connect(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.control.send(Control::Connect { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Close the connection and release the socket.
    ///
    /// Returns after the worker has finished. The `Disconnected` event has
    /// been delivered by then. A no-op on an idle link.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self.control.send(Control::Disconnect { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Disconnect and connect again using the current configuration.
    ///
    /// Only acts on a link that is connecting or connected.
    pub async fn restart(&self) {
        let (done, rx) = oneshot::channel();
        if self
            .control
            .send(Control::Restart { done: Some(done) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Queue bytes for transmission. Bytes written while the link is down
    /// are dropped.
    pub fn write(&self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() {
            return;
        }
        if self.control.send(Control::Write(data)).is_err() {
            trace!(session = %self.id, "Write dropped, session ended");
        }
    }

    /// Wait until every earlier write has been handed to the socket.
    pub async fn flush(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.control
            .send(Control::Flush { done })
            .map_err(|_| LinkError::Closed)?;
        // A dropped reply means the worker went away with the queue
        let _ = rx.await;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Inbound throughput, bytes/sec.
    pub fn current_in_rate(&self) -> u64 {
        self.shared.in_rate.current_rate()
    }

    /// Outbound throughput, bytes/sec.
    pub fn current_out_rate(&self) -> u64 {
        self.shared.out_rate.current_rate()
    }

    pub fn in_bytes_total(&self) -> u64 {
        self.shared.in_rate.total_bytes()
    }

    pub fn out_bytes_total(&self) -> u64 {
        self.shared.out_rate.total_bytes()
    }

    /// Declared link capacity in bits/sec. Not measured.
    pub fn nominal_link_speed(&self) -> u64 {
        TCP_LINK_SPEED_BPS
    }

    /// Disconnect and wait until the session has fully shut down.
    pub async fn close(self) {
        let Self {
            control, lifecycle, ..
        } = self;
        drop(control);
        if let Err(e) = lifecycle.await {
            error!(error = %e, "Link lifecycle task failed");
        }
    }
}

/// Runs on its own task; serializes every lifecycle request of one session.
struct Lifecycle {
    id: SessionId,
    config: SharedLinkConfiguration,
    shared: Arc<LinkShared>,
    worker: Option<WorkerHandle>,
}

impl Lifecycle {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Control>) {
        while let Some(request) = requests.recv().await {
            match request {
                Control::Connect { reply } => {
                    let started = self.connect().await;
                    let _ = reply.send(started);
                }
                Control::Disconnect { done } => {
                    self.disconnect().await;
                    let _ = done.send(());
                }
                Control::Restart { done } => {
                    self.restart().await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
                Control::Write(data) => self.write(data),
                Control::Flush { done } => self.flush(done),
            }
        }

        // Every owner handle is gone
        self.disconnect().await;
        self.config.write().await.unbind(self.id);
        debug!(session = %self.id, "Link session ended");
    }

    fn is_active(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
            && matches!(
                self.shared.state(),
                ConnectionState::Connecting | ConnectionState::Connected
            )
    }

    async fn connect(&mut self) -> bool {
        if self.is_active() {
            debug!(session = %self.id, state = %self.shared.state(), "Connect ignored, link active");
            return false;
        }

        // The previous worker may still be tearing down
        if let Some(previous) = self.worker.take() {
            self.join(previous).await;
        }

        let target = {
            let config = self.config.read().await;
            ConnectTarget {
                name: config.name().to_string(),
                addr: config.socket_addr(),
            }
        };
        info!(link = %target.name, addr = %target.addr, "Connecting link");

        self.shared.set_state(ConnectionState::Connecting);
        self.worker = Some(WorkerHandle::spawn(Arc::clone(&self.shared), target));
        true
    }

    async fn disconnect(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.request(WorkerCommand::Stop);
        self.join(worker).await;
    }

    async fn restart(&mut self) {
        if !self.is_active() {
            debug!(session = %self.id, "Restart ignored, link not active");
            return;
        }
        self.disconnect().await;
        self.connect().await;
    }

    fn write(&self, data: Bytes) {
        match &self.worker {
            Some(worker) if !worker.is_finished() => {
                worker.request(WorkerCommand::Write(data));
            }
            _ => trace!(bytes = data.len(), "Write dropped, link not connected"),
        }
    }

    fn flush(&self, done: oneshot::Sender<()>) {
        match &self.worker {
            Some(worker) => worker.request(WorkerCommand::Flush(done)),
            None => {
                let _ = done.send(());
            }
        }
    }

    /// Wait for `worker` to end. A worker that died mid-connection still
    /// gets its `Disconnected` emitted here.
    async fn join(&self, worker: WorkerHandle) {
        if let Err(e) = worker.join().await {
            error!(session = %self.id, error = %e, "Link worker failed");
            let previous = self.shared.state();
            self.shared.set_state(ConnectionState::Idle);
            if matches!(
                previous,
                ConnectionState::Connected | ConnectionState::Disconnecting
            ) {
                self.shared.emit(LinkEvent::Disconnected);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::configuration::LinkConfiguration;

    #[test]
    fn test_options_default() {
        let options = SessionOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(1));
        assert!(!options.dump_writes);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnecting.to_string(), "disconnecting");
    }

    #[tokio::test]
    async fn test_new_session_is_idle_and_bound() {
        let config = LinkConfiguration::new("idle").into_shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = LinkSession::new(Arc::clone(&config), tx).await;

        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(!session.is_connected());
        assert_eq!(session.nominal_link_speed(), 54_000_000);
        assert_eq!(config.read().await.bound_session(), Some(session.id()));
    }

    #[tokio::test]
    async fn test_close_clears_binding() {
        let config = LinkConfiguration::new("close").into_shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = LinkSession::new(Arc::clone(&config), tx).await;

        session.close().await;
        assert!(config.read().await.bound_session().is_none());
        assert!(!config.read().await.request_restart());
    }

    #[tokio::test]
    async fn test_flush_on_idle_link() {
        let config = LinkConfiguration::new("flush").into_shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = LinkSession::new(config, tx).await;

        session.write(&b"dropped"[..]);
        session.flush().await.unwrap();
        assert_eq!(session.out_bytes_total(), 0);
    }
}
