//! Action dispatcher.
//!
//! Turns local intents into outbound messages. Each action is checked against
//! the projection as it is at call time; a failed check is reported to the
//! caller as [`Error::PreconditionFailed`] and nothing is sent. Only the
//! mechanically checkable cases are filtered here. The coordinator still
//! decides what is legal.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::ClientMessage;

use super::connection::Outbound;
use super::engine::Reconciler;
use super::game::{Phase, RoomId, Session};
use super::player::{LocalView, Membership, ParticipantStatus};
use super::store::Projection;

/// Local intents the dispatcher can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Join,
    Ready,
    PlaceBet,
    Hit,
    Stand,
    DoubleDown,
    NextRound,
    Leave,
    Reset,
    Resync,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Ready => "ready",
            Self::PlaceBet => "placeBet",
            Self::Hit => "hit",
            Self::Stand => "stand",
            Self::DoubleDown => "doubleDown",
            Self::NextRound => "nextRound",
            Self::Leave => "leave",
            Self::Reset => "reset",
            Self::Resync => "resync",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Check<T> = std::result::Result<T, &'static str>;

/// Validates and sends local intents.
pub struct ActionDispatcher<O: Outbound> {
    outbound: Arc<O>,
    reconciler: Reconciler,
}

impl<O: Outbound> Clone for ActionDispatcher<O> {
    fn clone(&self) -> Self {
        Self {
            outbound: Arc::clone(&self.outbound),
            reconciler: self.reconciler.clone(),
        }
    }
}

impl<O: Outbound> fmt::Debug for ActionDispatcher<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("connected", &self.outbound.is_connected())
            .finish()
    }
}

impl<O: Outbound> ActionDispatcher<O> {
    pub fn new(outbound: Arc<O>, reconciler: Reconciler) -> Self {
        Self {
            outbound,
            reconciler,
        }
    }

    /// Join `room_id` as `name`.
    ///
    /// When already seated in a different room, a leave for that room is
    /// sent first, then the join.
    pub fn join(&self, name: &str, room_id: RoomId) -> Result<()> {
        let previous = self.check(Action::Join, |p| match p.membership() {
            Membership::Joining { .. } => Err("a join is already pending"),
            Membership::Joined { room_id: current } if *current == room_id => {
                Err("already joined this room")
            }
            Membership::Joined { room_id: current } => Ok(Some(current.clone())),
            Membership::Unjoined | Membership::Leaving { .. } => Ok(None),
        })?;

        if let Some(previous) = previous {
            info!(from = %previous, to = %room_id, "switching rooms");
            self.send(ClientMessage::LeaveGame { room_id: previous })?;
        }

        self.send(ClientMessage::JoinGame {
            player_name: name.to_string(),
            room_id: room_id.clone(),
        })?;
        self.reconciler.on_join_requested(room_id, name.to_string());
        Ok(())
    }

    /// Mark the local participant ready. Refused again until the
    /// coordinator's next word on our state.
    pub fn ready(&self) -> Result<()> {
        let room_id = self.check(Action::Ready, |p| {
            let (session, local) = seated_in_phase(p, Phase::Waiting)?;
            if local.status == ParticipantStatus::Ready {
                return Err("already ready");
            }
            if p.pending_intent() == Some(Action::Ready) {
                return Err("ready already sent");
            }
            Ok(session.session_id.clone())
        })?;
        self.send(ClientMessage::PlayerReady { room_id })?;
        self.reconciler.on_intent_sent(Action::Ready);
        Ok(())
    }

    pub fn place_bet(&self, amount: u64) -> Result<()> {
        let room_id = self.check(Action::PlaceBet, |p| {
            let (session, local) = seated_in_phase(p, Phase::Betting)?;
            if local.status == ParticipantStatus::BetPlaced {
                return Err("bet already placed");
            }
            if amount == 0 {
                return Err("bet must be positive");
            }
            if amount > local.chips {
                return Err("bet exceeds chip balance");
            }
            if p.pending_intent() == Some(Action::PlaceBet) {
                return Err("bet already sent");
            }
            Ok(session.session_id.clone())
        })?;
        self.send(ClientMessage::PlaceBet { amount, room_id })?;
        self.reconciler.on_intent_sent(Action::PlaceBet);
        Ok(())
    }

    pub fn hit(&self) -> Result<()> {
        let room_id = self.check(Action::Hit, on_turn)?;
        self.send(ClientMessage::Hit { room_id })
    }

    pub fn stand(&self) -> Result<()> {
        let room_id = self.check(Action::Stand, on_turn)?;
        self.send(ClientMessage::Stand { room_id })
    }

    pub fn double_down(&self) -> Result<()> {
        let room_id = self.check(Action::DoubleDown, on_turn)?;
        self.send(ClientMessage::DoubleDown { room_id })
    }

    pub fn next_round(&self) -> Result<()> {
        let room_id = self.check(Action::NextRound, |p| {
            let session = p.session().ok_or("no session")?;
            if session.phase != Phase::GameOver {
                return Err("round is not over");
            }
            Ok(session.session_id.clone())
        })?;
        self.send(ClientMessage::NextRound { room_id })
    }

    /// Leave the current room. The projection is cleared without waiting
    /// for the coordinator to confirm.
    pub fn leave(&self) -> Result<()> {
        let room_id = self.check(Action::Leave, |p| match p.membership() {
            Membership::Joined { room_id } | Membership::Joining { room_id, .. } => {
                Ok(room_id.clone())
            }
            Membership::Leaving { .. } => Err("already leaving"),
            Membership::Unjoined => Err("not in a room"),
        })?;
        self.send(ClientMessage::LeaveGame { room_id })?;
        self.reconciler.on_leave_requested();
        Ok(())
    }

    /// Administrative reset of the addressed room.
    pub fn reset(&self) -> Result<()> {
        let room_id = self.check(Action::Reset, addressed_room)?;
        self.send(ClientMessage::ResetGame { room_id })
    }

    /// Ask the coordinator to restate the session.
    pub fn resync(&self) -> Result<()> {
        let room_id = self.check(Action::Resync, addressed_room)?;
        self.send(ClientMessage::DebugGameState { room_id })
    }

    /// Connection first, then the action's own precondition.
    fn check<T>(
        &self,
        action: Action,
        precondition: impl FnOnce(&Projection) -> Check<T>,
    ) -> Result<T> {
        if !self.outbound.is_connected() {
            debug!(%action, "not connected");
            return Err(Error::NotConnected);
        }
        self.reconciler.store().read(precondition).map_err(|reason| {
            debug!(%action, reason, "precondition failed");
            Error::PreconditionFailed { action, reason }
        })
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        debug!(kind = message.kind(), room = %message.room_id(), "dispatching");
        self.outbound.send(message)
    }
}

fn seated_in_phase(p: &Projection, phase: Phase) -> Check<(&Session, &LocalView)> {
    let session = p.session().ok_or("no session")?;
    let local = p.local().ok_or("not seated")?;
    if session.phase != phase {
        return Err(match phase {
            Phase::Waiting => "not in waiting phase",
            Phase::Betting => "not in betting phase",
            Phase::Playing => "not in playing phase",
            Phase::DealerTurn => "not in dealer turn",
            Phase::GameOver => "round is not over",
        });
    }
    Ok((session, local))
}

fn on_turn(p: &Projection) -> Check<RoomId> {
    let (session, local) = seated_in_phase(p, Phase::Playing)?;
    if !session.is_turn_of(&local.id) {
        return Err("not your turn");
    }
    Ok(session.session_id.clone())
}

fn addressed_room(p: &Projection) -> Check<RoomId> {
    p.room_id().cloned().ok_or("no room to address")
}
