//! Transport session.
//!
//! Owns the single duplex connection to the session coordinator. A supervisor
//! task dials through a [`Connector`], pumps the resulting [`Link`], and
//! redials according to a [`ReconnectPolicy`] when the link drops. Everything
//! it observes is reported as a [`TransportEvent`] on one bounded channel, in
//! order, for the event loop to fold into the session store.
//!
//! ```text
//!  connect()                    link closed by peer
//!     │                        ┌────────────────────┐
//!     ▼                        ▼                    │
//! ┌────────────┐  ok   ┌─────────────┐              │
//! │ Connecting │──────▶│  Connected  │──────────────┘
//! └─────┬──────┘       └──────┬──────┘
//!   err │ (≤ max_attempts)    │ disconnect()
//!       ▼                     ▼
//!  backoff, redial      ┌──────────────┐
//!       │               │ Disconnected │
//!       ▼               └──────────────┘
//! ┌────────────┐
//! │   GaveUp   │
//! └────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ServerMessage};

use super::player::ParticipantId;

/// Default number of dial attempts per connect cycle.
pub const DEFAULT_RECONNECT_ATTEMPTS: usize = 5;

/// Default delay before the first redial.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for backoff delays.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default timeout for one dial plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a graceful shutdown of the supervisor.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// How redial delays grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// Reconnection policy for the transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Dial attempts per connect cycle (including the first). Values below 1 count as 1.
    pub max_attempts: usize,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            backoff: Backoff::Exponential,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after `failures` consecutive failed attempts.
    pub fn delay_for(&self, failures: usize) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let shift = failures.saturating_sub(1).min(16) as u32;
                self.initial_delay.saturating_mul(1 << shift)
            }
        };
        delay.min(self.max_delay)
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

/// Connection state as seen by presentation code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live connection and no attempt in flight
    #[default]
    Disconnected,

    /// Dial in flight
    Connecting { attempt: usize },

    /// Live, with the id the coordinator assigned
    Connected { id: ParticipantId },

    /// Attempts exhausted; waits for an explicit connect
    GaveUp { attempts: usize },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Assigned connection id while connected.
    pub fn connection_id(&self) -> Option<&ParticipantId> {
        match self {
            Self::Connected { id } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting { attempt } => write!(f, "Connecting(attempt {})", attempt),
            Self::Connected { id } => write!(f, "Connected({})", id),
            Self::GaveUp { attempts } => write!(f, "GaveUp(after {})", attempts),
        }
    }
}

/// Everything the transport reports to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting { attempt: usize },
    Connected { id: ParticipantId },
    ConnectionFailed { attempt: usize, cause: String },
    Disconnected { reason: Option<String>, voluntary: bool },
    GaveUp { attempts: usize, cause: String },
    Message(ServerMessage),
}

/// A live, typed duplex link to the coordinator.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Next inbound message; `None` once the peer has closed.
    /// A `Decode` error drops one frame and leaves the link usable.
    async fn recv(&mut self) -> Option<Result<ServerMessage>>;

    async fn close(&mut self) -> Result<()>;
}

/// A link plus the identity assigned during its handshake.
pub struct Established {
    pub id: ParticipantId,
    pub link: Box<dyn Link>,
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established").field("id", &self.id).finish()
    }
}

/// Dials the coordinator and completes the handshake.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Established>;
}

/// Sink for outbound intents.
pub trait Outbound: Send + Sync {
    /// Send one message, at most once. Fails with `NotConnected` when no link is live.
    fn send(&self, message: ClientMessage) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// State shared between the session handle and its supervisor.
#[derive(Default)]
struct Shared {
    /// Supervisor running (dialing, connected, or backing off)
    active: AtomicBool,
    /// Sender into the live link, present only while connected
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the single connection to the coordinator.
pub struct TransportSession {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<Shared>,
}

impl TransportSession {
    pub fn new(
        connector: impl Connector,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            policy,
            connect_timeout,
            events,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Start connecting. At most one connect cycle runs at a time.
    ///
    /// # Errors
    ///
    /// `ConnectInProgress` while dialing or backing off, `AlreadyConnected`
    /// while a link is live.
    pub fn connect(&self) -> Result<()> {
        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(if self.is_connected() {
                Error::AlreadyConnected
            } else {
                Error::ConnectInProgress
            });
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *lock(&self.shared.shutdown) = Some(shutdown_tx);

        let task = tokio::spawn(supervise(
            Arc::clone(&self.connector),
            self.policy,
            self.connect_timeout,
            self.events.clone(),
            Arc::clone(&self.shared),
            shutdown_rx,
        ));
        *lock(&self.shared.task) = Some(task);
        Ok(())
    }

    /// Close the link (or stop redialing) and wait for the supervisor to exit.
    pub async fn disconnect(&self) {
        if let Some(tx) = lock(&self.shared.shutdown).take() {
            let _ = tx.send(());
        }

        let task = lock(&self.shared.task).take();
        if let Some(mut task) = task {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!("transport supervisor failed: {join_err}"),
                Err(_) => {
                    warn!("transport supervisor did not exit within timeout; aborting");
                    task.abort();
                    *lock(&self.shared.outbound) = None;
                    self.shared.active.store(false, Ordering::Release);
                }
            }
        }
    }
}

impl Outbound for TransportSession {
    fn send(&self, message: ClientMessage) -> Result<()> {
        match lock(&self.shared.outbound).as_ref() {
            Some(tx) => tx.send(message).map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared.outbound).is_some()
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("connected", &self.is_connected())
            .field("active", &self.shared.active.load(Ordering::Acquire))
            .field("policy", &self.policy)
            .finish()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.shared.task).take() {
            task.abort();
        }
    }
}

/// Why a live link stopped.
enum LinkExit {
    Shutdown,
    Lost(String),
}

/// Connect cycle: dial, pump, redial. Ends on shutdown or when attempts run out.
async fn supervise(
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut failures = 0usize;

    let terminal = 'cycle: loop {
        let attempt = failures + 1;
        debug!(attempt, "dialing coordinator");
        emit(&events, TransportEvent::Connecting { attempt }).await;

        let dial = tokio::time::timeout(connect_timeout, connector.connect());
        let result = tokio::select! {
            _ = &mut shutdown => break 'cycle voluntary_disconnect(),
            result = dial => result.unwrap_or(Err(Error::DialTimeout)),
        };

        match result {
            Ok(Established { id, link }) => {
                failures = 0;
                info!(%id, "connected to coordinator");

                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&shared.outbound) = Some(tx);
                emit(&events, TransportEvent::Connected { id }).await;

                let exit = pump(link, rx, &events, &mut shutdown).await;
                *lock(&shared.outbound) = None;

                match exit {
                    LinkExit::Shutdown => break 'cycle voluntary_disconnect(),
                    LinkExit::Lost(cause) => {
                        warn!(%cause, "connection lost, redialing");
                        emit(
                            &events,
                            TransportEvent::Disconnected {
                                reason: Some(cause),
                                voluntary: false,
                            },
                        )
                        .await;
                    }
                }
            }
            Err(err) => {
                failures += 1;
                let cause = err.to_string();
                warn!(attempt, %cause, "connection attempt failed");
                emit(
                    &events,
                    TransportEvent::ConnectionFailed {
                        attempt,
                        cause: cause.clone(),
                    },
                )
                .await;

                if failures >= policy.attempts() {
                    error!(attempts = failures, "giving up on coordinator");
                    break 'cycle TransportEvent::GaveUp {
                        attempts: failures,
                        cause,
                    };
                }

                let delay = policy.delay_for(failures);
                debug!(?delay, "backing off before redial");
                tokio::select! {
                    _ = &mut shutdown => break 'cycle voluntary_disconnect(),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    // Release the guard first so a caller reacting to the final event can reconnect.
    shared.active.store(false, Ordering::Release);
    emit(&events, terminal).await;
    debug!("transport supervisor exited");
}

fn voluntary_disconnect() -> TransportEvent {
    TransportEvent::Disconnected {
        reason: None,
        voluntary: true,
    }
}

/// Multiplex outbound sends and inbound frames on one live link.
///
/// Queued sends go out before a shutdown is honoured, so a message handed to
/// [`Outbound::send`] before `disconnect` reaches the link.
async fn pump(
    mut link: Box<dyn Link>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> LinkExit {
    loop {
        tokio::select! {
            biased;

            Some(message) = outbound.recv() => {
                debug!(kind = message.kind(), "sending");
                if let Err(err) = link.send(&message).await {
                    error!("send failed: {err}");
                    return LinkExit::Lost(format!("send failed: {err}"));
                }
            }

            _ = &mut *shutdown => {
                while let Ok(message) = outbound.try_recv() {
                    debug!(kind = message.kind(), "flushing before close");
                    if let Err(err) = link.send(&message).await {
                        debug!("flush failed: {err}");
                        break;
                    }
                }
                debug!("shutdown requested, closing link");
                if let Err(err) = link.close().await {
                    debug!("error while closing link: {err}");
                }
                return LinkExit::Shutdown;
            }

            incoming = link.recv() => match incoming {
                Some(Ok(ServerMessage::ConnectionEstablished { id })) => {
                    debug!(%id, "ignoring repeated handshake");
                }
                Some(Ok(message)) => {
                    debug!(kind = message.kind(), "received");
                    emit(events, TransportEvent::Message(message)).await;
                }
                Some(Err(Error::Decode(err))) => {
                    warn!("dropping undecodable frame: {err}");
                }
                Some(Err(err)) => return LinkExit::Lost(err.to_string()),
                None => return LinkExit::Lost("connection closed by coordinator".to_string()),
            },
        }
    }
}

/// Deliver an event. Events are never dropped; a closed receiver means
/// nobody is listening any more.
async fn emit(events: &mpsc::Sender<TransportEvent>, event: TransportEvent) {
    if events.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

/// Scripted connector and link for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Outbound messages recorded by a [`MockLink`].
    pub(crate) type Sent = Arc<Mutex<Vec<ClientMessage>>>;

    /// Test-side handle to drive a link: push inbound results, drop to close.
    pub(crate) type Feed = mpsc::UnboundedSender<Result<ServerMessage>>;

    pub(crate) struct MockLink {
        incoming: mpsc::UnboundedReceiver<Result<ServerMessage>>,
        sent: Sent,
    }

    #[async_trait]
    impl Link for MockLink {
        async fn send(&mut self, message: &ClientMessage) -> Result<()> {
            lock(&self.sent).push(message.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<ServerMessage>> {
            self.incoming.recv().await
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// One scripted dial outcome.
    pub(crate) enum Dial {
        Accept { id: &'static str, link: MockLink },
        Refuse(&'static str),
        Hang,
    }

    /// Build a link plus its feed and the record of what it sent.
    pub(crate) fn make_link() -> (MockLink, Feed, Sent) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let link = MockLink {
            incoming: rx,
            sent: Arc::clone(&sent),
        };
        (link, tx, sent)
    }

    /// Connector that replays scripted dial outcomes, refusing once exhausted.
    #[derive(Clone, Default)]
    pub(crate) struct MockConnector {
        script: Arc<Mutex<VecDeque<Dial>>>,
        dials: Arc<Mutex<usize>>,
    }

    impl MockConnector {
        pub(crate) fn new(script: Vec<Dial>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                dials: Arc::new(Mutex::new(0)),
            }
        }

        pub(crate) fn dials(&self) -> usize {
            *lock(&self.dials)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Established> {
            *lock(&self.dials) += 1;
            let next = lock(&self.script).pop_front();
            match next {
                Some(Dial::Accept { id, link }) => Ok(Established {
                    id: ParticipantId::from(id),
                    link: Box::new(link),
                }),
                Some(Dial::Refuse(cause)) => Err(Error::ConnectionFailed(cause.to_string())),
                Some(Dial::Hang) => std::future::pending().await,
                None => Err(Error::ConnectionFailed("script exhausted".to_string())),
            }
        }
    }
}
