//! Messages exchanged with the session coordinator.
//!
//! Frames are JSON text, adjacently tagged as `{"type": ..., "data": {...}}`
//! with camelCase field names.

use serde::{Deserialize, Serialize};

use crate::state::game::{RoomId, Session};
use crate::state::player::{Participant, ParticipantId};

/// Outbound intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinGame { player_name: String, room_id: RoomId },
    PlayerReady { room_id: RoomId },
    PlaceBet { amount: u64, room_id: RoomId },
    Hit { room_id: RoomId },
    Stand { room_id: RoomId },
    DoubleDown { room_id: RoomId },
    NextRound { room_id: RoomId },
    LeaveGame { room_id: RoomId },
    ResetGame { room_id: RoomId },
    /// Ask the coordinator to restate the session
    DebugGameState { room_id: RoomId },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinGame { .. } => "joinGame",
            Self::PlayerReady { .. } => "playerReady",
            Self::PlaceBet { .. } => "placeBet",
            Self::Hit { .. } => "hit",
            Self::Stand { .. } => "stand",
            Self::DoubleDown { .. } => "doubleDown",
            Self::NextRound { .. } => "nextRound",
            Self::LeaveGame { .. } => "leaveGame",
            Self::ResetGame { .. } => "resetGame",
            Self::DebugGameState { .. } => "debugGameState",
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::JoinGame { room_id, .. }
            | Self::PlayerReady { room_id }
            | Self::PlaceBet { room_id, .. }
            | Self::Hit { room_id }
            | Self::Stand { room_id }
            | Self::DoubleDown { room_id }
            | Self::NextRound { room_id }
            | Self::LeaveGame { room_id }
            | Self::ResetGame { room_id }
            | Self::DebugGameState { room_id } => room_id,
        }
    }
}

/// Inbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Handshake frame carrying the assigned connection id
    ConnectionEstablished { id: ParticipantId },

    #[serde(rename = "gameStateUpdate")]
    Snapshot {
        #[serde(rename = "gameState")]
        session: Session,
    },

    #[serde(rename = "playerJoined")]
    ParticipantJoined {
        #[serde(rename = "player")]
        participant: Participant,
        #[serde(rename = "gameState")]
        session: Session,
    },

    #[serde(rename = "playerLeft")]
    ParticipantLeft {
        #[serde(rename = "playerId")]
        participant_id: ParticipantId,
        #[serde(rename = "playerName", default)]
        participant_name: String,
        #[serde(rename = "gameState")]
        session: Session,
    },

    #[serde(rename = "playerStateUpdate")]
    ParticipantUpdated {
        #[serde(rename = "playerState")]
        participant: Participant,
    },

    #[serde(rename = "gameMessage")]
    StatusMessage {
        #[serde(rename = "message")]
        text: String,
    },

    #[serde(rename = "joinError")]
    JoinRejected { reason: String },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connectionEstablished",
            Self::Snapshot { .. } => "gameStateUpdate",
            Self::ParticipantJoined { .. } => "playerJoined",
            Self::ParticipantLeft { .. } => "playerLeft",
            Self::ParticipantUpdated { .. } => "playerStateUpdate",
            Self::StatusMessage { .. } => "gameMessage",
            Self::JoinRejected { .. } => "joinError",
        }
    }
}
