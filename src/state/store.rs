//! Session store.
//!
//! Holds the current [`Projection`] behind a `tokio::sync::watch` channel.
//! Every write runs to completion under the channel's write lock before
//! subscribers are woken, so a subscriber never sees a session whose local
//! view has not been recomputed for it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::Fault;

use super::connection::ConnectionState;
use super::dispatch::Action;
use super::game::{Phase, RoomId, Session};
use super::player::{LocalIdentity, LocalView, Membership, ParticipantId};

/// A fault with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub fault: Fault,
    pub at: DateTime<Utc>,
}

impl FaultRecord {
    pub fn now(fault: Fault) -> Self {
        Self {
            fault,
            at: Utc::now(),
        }
    }
}

/// Everything presentation code may read.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub(crate) session: Option<Session>,
    pub(crate) local: Option<LocalView>,
    pub(crate) connection: ConnectionState,
    pub(crate) membership: Membership,
    pub(crate) last_error: Option<FaultRecord>,
    /// Sent action whose effect no authoritative state has reflected yet
    pub(crate) pending_intent: Option<Action>,
    pub(crate) revision: u64,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl Projection {
    /// Last authoritative session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Local participant's view, if seated in `session`.
    pub fn local(&self) -> Option<&LocalView> {
        self.local.as_ref()
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn last_error(&self) -> Option<&FaultRecord> {
        self.last_error.as_ref()
    }

    pub fn pending_intent(&self) -> Option<Action> {
        self.pending_intent
    }

    /// Number of completed reconciliation steps.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn identity(&self) -> LocalIdentity {
        match self.connection.connection_id() {
            Some(id) => LocalIdentity::assigned(id.clone()),
            None => LocalIdentity::unresolved(),
        }
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.connection.connection_id()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.session.as_ref().map(|s| s.phase)
    }

    /// Room to address: the displayed session's, else the membership's.
    pub fn room_id(&self) -> Option<&RoomId> {
        self.session
            .as_ref()
            .map(|s| &s.session_id)
            .or_else(|| self.membership.room_id())
    }

    /// Drop the session, local view and any pending intent.
    pub(crate) fn clear(&mut self) {
        self.session = None;
        self.local = None;
        self.pending_intent = None;
    }

    /// Recompute the local view from the current session.
    pub(crate) fn refresh_local(&mut self) {
        let identity = self.identity();
        self.local = self.session.as_ref().and_then(|session| {
            identity
                .resolve_local(session)
                .map(|participant| LocalView::project(participant, session))
        });
    }

    pub(crate) fn record(&mut self, fault: Fault) {
        self.last_error = Some(FaultRecord::now(fault));
    }
}

/// Shared, update-notified holder of the current projection.
#[derive(Debug, Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Projection>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Projection::default());
        Self { tx: Arc::new(tx) }
    }

    /// Receiver that is notified after every completed step.
    pub fn subscribe(&self) -> watch::Receiver<Projection> {
        self.tx.subscribe()
    }

    /// Clone of the current projection.
    pub fn current(&self) -> Projection {
        self.tx.borrow().clone()
    }

    /// Read the current projection without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&Projection) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Apply one step. Subscribers are notified once `f` has returned.
    pub(crate) fn update<R: Default>(&self, f: impl FnOnce(&mut Projection) -> R) -> R {
        let mut out = R::default();
        self.tx.send_modify(|projection| {
            out = f(projection);
            projection.revision += 1;
            projection.updated_at = Some(Utc::now());
        });
        out
    }
}
