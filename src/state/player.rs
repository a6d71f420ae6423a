//! Participants, the local participant's view, and room membership.
//!
//! # Membership State Diagram
//!
//! ```text
//! ┌──────────┐   request_join    ┌───────────┐   confirm   ┌──────────┐
//! │ Unjoined │──────────────────▶│  Joining  │────────────▶│  Joined  │
//! └──────────┘                   └─────┬─────┘             └────┬─────┘
//!      ▲  ▲                            │ reject                 │
//!      │  └────────────────────────────┘                        │ request_leave
//!      │                                                        ▼
//!      │          departed            ┌───────────┐             │
//!      └──────────────────────────────│  Leaving  │◀────────────┘
//!                                     └───────────┘
//! ```
//!
//! `Joined` may also go straight to `Joining` when the player switches rooms,
//! and any state returns to `Unjoined` on `Reset` (connection loss).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::game::{Hand, RoomId, Session};

/// Participant identity: the connection id the coordinator assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a participant stands in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantStatus {
    #[default]
    Waiting,
    Ready,
    BetPlaced,
    Playing,
    #[serde(alias = "stand")]
    Stood,
    Bust,
    Blackjack,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::BetPlaced => "betPlaced",
            Self::Playing => "playing",
            Self::Stood => "stood",
            Self::Bust => "bust",
            Self::Blackjack => "blackjack",
        }
    }

    /// Check if the participant has no further decisions this round.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Stood | Self::Bust | Self::Blackjack)
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seated player, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,

    #[serde(rename = "name")]
    pub display_name: String,

    /// Chip balance
    #[serde(default)]
    pub chips: u64,

    /// Current wager
    #[serde(default)]
    pub bet: u64,

    #[serde(flatten)]
    pub hand: Hand,

    #[serde(default)]
    pub status: ParticipantStatus,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, chips: u64) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            chips,
            bet: 0,
            hand: Hand::default(),
            status: ParticipantStatus::Waiting,
        }
    }

    pub fn with_status(mut self, status: ParticipantStatus) -> Self {
        self.status = status;
        self
    }
}

/// The local participant's slice of the session.
///
/// Recomputed from `Session.participants` at the end of every reconciliation
/// step, so it always agrees with the matching entry there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalView {
    pub id: ParticipantId,
    pub display_name: String,
    pub chips: u64,
    pub bet: u64,
    pub hand: Hand,
    pub status: ParticipantStatus,
    /// Whether the session is waiting on this participant's decision
    pub is_current_turn: bool,
}

impl LocalView {
    /// Project a participant entry of `session`.
    pub fn project(participant: &Participant, session: &Session) -> Self {
        Self {
            id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            chips: participant.chips,
            bet: participant.bet,
            hand: participant.hand.clone(),
            status: participant.status,
            is_current_turn: session.is_turn_of(&participant.id),
        }
    }

    /// Check that this view matches a participant entry field for field.
    pub fn agrees_with(&self, participant: &Participant) -> bool {
        self.id == participant.id
            && self.display_name == participant.display_name
            && self.chips == participant.chips
            && self.bet == participant.bet
            && self.hand == participant.hand
            && self.status == participant.status
    }
}

/// Resolves which participant in a session is "self".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    local_id: Option<ParticipantId>,
}

impl LocalIdentity {
    /// Identity before the transport has assigned an id.
    pub fn unresolved() -> Self {
        Self { local_id: None }
    }

    /// Identity for an assigned connection id.
    pub fn assigned(id: ParticipantId) -> Self {
        Self { local_id: Some(id) }
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    pub fn is_local(&self, id: &ParticipantId) -> bool {
        self.local_id.as_ref() == Some(id)
    }

    /// Find the local participant in `session`, if it is seated there.
    pub fn resolve_local<'s>(&self, session: &'s Session) -> Option<&'s Participant> {
        let local_id = self.local_id.as_ref()?;
        session.participants.iter().find(|p| &p.id == local_id)
    }
}

/// Local participant's relationship to a room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Membership {
    /// Not in any room
    #[default]
    Unjoined,

    /// Join sent, not yet echoed back
    Joining { room_id: RoomId, name: String },

    /// Seated in a room
    Joined { room_id: RoomId },

    /// Leave sent; projections already cleared
    Leaving { room_id: RoomId },
}

impl Membership {
    /// Room this membership refers to, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::Unjoined => None,
            Self::Joining { room_id, .. }
            | Self::Joined { room_id }
            | Self::Leaving { room_id } => Some(room_id),
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joined { .. })
    }

    pub fn is_joining(&self) -> bool {
        matches!(self, Self::Joining { .. })
    }

    pub fn is_leaving(&self) -> bool {
        matches!(self, Self::Leaving { .. })
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unjoined => write!(f, "Unjoined"),
            Self::Joining { room_id, name } => write!(f, "Joining({}, {})", room_id, name),
            Self::Joined { room_id } => write!(f, "Joined({})", room_id),
            Self::Leaving { room_id } => write!(f, "Leaving({})", room_id),
        }
    }
}

/// Membership transition events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    RequestJoin { room_id: RoomId, name: String },
    Confirm { room_id: RoomId },
    Reject,
    RequestLeave,
    Departed,
    Reset,
}

/// Error when a membership transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from} via {event:?}: {reason}")]
pub struct InvalidTransition {
    pub from: Membership,
    pub event: MembershipEvent,
    pub reason: &'static str,
}

impl Membership {
    /// Apply an event, returning the new membership or an error.
    pub fn apply(&self, event: MembershipEvent) -> Result<Self, InvalidTransition> {
        self.transition(&event)
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: MembershipEvent) -> Result<(), InvalidTransition> {
        *self = self.transition(&event)?;
        Ok(())
    }

    fn transition(&self, event: &MembershipEvent) -> Result<Self, InvalidTransition> {
        use Membership::*;
        use MembershipEvent::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.clone(),
            event: event.clone(),
            reason,
        };

        match (self, event) {
            // RequestJoin: Unjoined/Leaving -> Joining, Joined elsewhere -> Joining
            (Unjoined | Leaving { .. }, RequestJoin { room_id, name }) => Ok(Joining {
                room_id: room_id.clone(),
                name: name.clone(),
            }),
            (Joined { room_id: current }, RequestJoin { room_id, .. }) if current == room_id => {
                Err(invalid("Already joined this room"))
            }
            (Joined { .. }, RequestJoin { room_id, name }) => Ok(Joining {
                room_id: room_id.clone(),
                name: name.clone(),
            }),
            (Joining { .. }, RequestJoin { .. }) => Err(invalid("Join already pending")),

            // Confirm: the local participant showed up in a session
            (Leaving { .. }, Confirm { .. }) => Err(invalid("Leave pending")),
            (Joining { room_id: pending, .. }, Confirm { room_id }) if pending != room_id => {
                Err(invalid("Join pending for another room"))
            }
            (_, Confirm { room_id }) => Ok(Joined {
                room_id: room_id.clone(),
            }),

            // Reject: Joining -> Unjoined
            (Joining { .. }, Reject) => Ok(Unjoined),
            (_, Reject) => Err(invalid("No join pending")),

            // RequestLeave: Joined/Joining -> Leaving
            (Joined { room_id } | Joining { room_id, .. }, RequestLeave) => Ok(Leaving {
                room_id: room_id.clone(),
            }),
            (Leaving { .. }, RequestLeave) => Err(invalid("Leave already pending")),
            (Unjoined, RequestLeave) => Err(invalid("Not in a room")),

            // Departed: coordinator confirmed the local participant is gone
            (Unjoined, Departed) => Err(invalid("Not in a room")),
            (_, Departed) => Ok(Unjoined),

            (_, Reset) => Ok(Unjoined),
        }
    }
}
