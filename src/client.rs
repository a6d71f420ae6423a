//! Composition root.
//!
//! [`GameClient`] owns the one [`TransportSession`] and wires it to the
//! reconciler, store, and dispatcher. Transport events are folded by a single
//! event-loop task, in receipt order.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Fault, Result};
use crate::state::connection::{Connector, Outbound, TransportEvent, TransportSession};
use crate::state::dispatch::ActionDispatcher;
use crate::state::engine::{Reconciler, Step};
use crate::state::store::{Projection, SessionStore};
use crate::ws::WsConnector;

/// A connected blackjack client.
pub struct GameClient {
    transport: Arc<TransportSession>,
    reconciler: Reconciler,
    actions: ActionDispatcher<TransportSession>,
    event_loop: JoinHandle<()>,
}

impl GameClient {
    /// Build a client over `connector`. Must be called inside a tokio runtime.
    /// Nothing is dialed until [`connect`](Self::connect).
    pub fn start(config: &ClientConfig, connector: impl Connector) -> Self {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let transport = Arc::new(TransportSession::new(
            connector,
            config.reconnect,
            config.connect_timeout,
            tx,
        ));
        let reconciler = Reconciler::new(SessionStore::new());
        let actions = ActionDispatcher::new(Arc::clone(&transport), reconciler.clone());

        let event_loop = tokio::spawn(run_event_loop(rx, reconciler.clone(), actions.clone()));

        Self {
            transport,
            reconciler,
            actions,
            event_loop,
        }
    }

    /// Client for the WebSocket endpoint in `config`.
    pub fn with_websocket(config: &ClientConfig) -> Self {
        Self::start(config, WsConnector::new(config.endpoint.clone()))
    }

    /// Start a connect cycle.
    pub fn connect(&self) -> Result<()> {
        self.transport.connect()
    }

    /// Close the connection. The store is cleared once the close is processed.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Validated outbound actions.
    pub fn actions(&self) -> &ActionDispatcher<TransportSession> {
        &self.actions
    }

    pub fn store(&self) -> &SessionStore {
        self.reconciler.store()
    }

    /// Receiver notified after every completed reconciliation step.
    pub fn subscribe(&self) -> watch::Receiver<Projection> {
        self.store().subscribe()
    }

    pub fn current(&self) -> Projection {
        self.store().current()
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Fold transport events one at a time. An inconsistent snapshot is answered
/// with a resync request so the next snapshot restores the view.
async fn run_event_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    reconciler: Reconciler,
    actions: ActionDispatcher<TransportSession>,
) {
    while let Some(event) = events.recv().await {
        if let Step::Faulted(Fault::DataIntegrity(fault)) = reconciler.on_transport(event) {
            warn!(%fault, "requesting resync");
            if let Err(err) = actions.resync() {
                debug!("resync not sent: {err}");
            }
        }
    }
    info!("event loop finished");
}
