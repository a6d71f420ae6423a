//! Session data model.
//!
//! Mirrors the coordinator's view of one blackjack room: cards, hands, the
//! dealer, the phase, and the participant roster. Nothing here computes
//! game rules; values arrive in snapshots and are only checked for
//! internal consistency.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::player::{Participant, ParticipantId};

/// Room identifier chosen by the joining player or the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle stage. Transitions are decided by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Players joining and marking themselves ready
    #[default]
    Waiting,
    /// Players placing bets
    Betting,
    /// Players taking turns
    Playing,
    /// Dealer drawing
    DealerTurn,
    /// Round settled
    GameOver,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Betting => "betting",
            Self::Playing => "playing",
            Self::DealerTurn => "dealerTurn",
            Self::GameOver => "gameOver",
        }
    }

    /// Check if a round is underway (cards are on the table).
    pub fn is_round_active(&self) -> bool {
        matches!(self, Self::Playing | Self::DealerTurn)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Card suit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

impl Suit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hearts => "hearts",
            Self::Diamonds => "diamonds",
            Self::Clubs => "clubs",
            Self::Spades => "spades",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hearts" | "♥" => Some(Self::Hearts),
            "diamonds" | "♦" => Some(Self::Diamonds),
            "clubs" | "♣" => Some(Self::Clubs),
            "spades" | "♠" => Some(Self::Spades),
            _ => None,
        }
    }
}

/// Card rank. `Number` holds 2 through 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    Ace,
    Number(u8),
    Jack,
    Queen,
    King,
}

impl Rank {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Some(Self::Ace),
            "J" => Some(Self::Jack),
            "Q" => Some(Self::Queen),
            "K" => Some(Self::King),
            other => match other.parse::<u8>() {
                Ok(n @ 2..=10) => Some(Self::Number(n)),
                _ => None,
            },
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Ace => "A".to_string(),
            Self::Number(n) => n.to_string(),
            Self::Jack => "J".to_string(),
            Self::Queen => "Q".to_string(),
            Self::King => "K".to_string(),
        }
    }

    /// Point value with aces counted high.
    pub fn points(&self) -> u32 {
        match self {
            Self::Ace => 11,
            Self::Number(n) => u32::from(*n),
            Self::Jack | Self::Queen | Self::King => 10,
        }
    }
}

/// A card on the table, or the face-down placeholder the dealer shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireCard", into = "WireCard")]
pub enum Card {
    Face { rank: Rank, suit: Suit },
    Hidden,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Self::Face { rank, suit }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Self::Hidden)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Face { rank, suit } => write!(f, "{} of {}", rank.label(), suit.as_str()),
            Self::Hidden => write!(f, "hidden"),
        }
    }
}

/// Card as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireCard {
    value: String,
    suit: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    hidden: bool,
}

#[derive(Debug, Error)]
#[error("unrecognized card {value:?} of {suit:?}")]
pub struct CardParseError {
    value: String,
    suit: String,
}

impl TryFrom<WireCard> for Card {
    type Error = CardParseError;

    fn try_from(wire: WireCard) -> Result<Self, Self::Error> {
        if wire.hidden || wire.value == "?" {
            return Ok(Self::Hidden);
        }
        match (Rank::parse(&wire.value), Suit::parse(&wire.suit)) {
            (Some(rank), Some(suit)) => Ok(Self::Face { rank, suit }),
            _ => Err(CardParseError {
                value: wire.value,
                suit: wire.suit,
            }),
        }
    }
}

impl From<Card> for WireCard {
    fn from(card: Card) -> Self {
        match card {
            Card::Face { rank, suit } => Self {
                value: rank.label(),
                suit: suit.as_str().to_string(),
                hidden: false,
            },
            Card::Hidden => Self {
                value: "?".to_string(),
                suit: "?".to_string(),
                hidden: true,
            },
        }
    }
}

/// Cards held by a participant or the dealer.
///
/// When the coordinator sends a score it is authoritative and returned as-is;
/// the local derivation is only a fallback for hands that arrive without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hand {
    #[serde(default)]
    pub cards: Vec<Card>,

    #[serde(default, rename = "score", skip_serializing_if = "Option::is_none")]
    reported_score: Option<u32>,
}

impl Hand {
    pub fn new(cards: Vec<Card>) -> Self {
        Self {
            cards,
            reported_score: None,
        }
    }

    pub fn with_reported_score(mut self, score: u32) -> Self {
        self.reported_score = Some(score);
        self
    }

    /// Score sent by the coordinator, if any.
    pub fn reported_score(&self) -> Option<u32> {
        self.reported_score
    }

    /// Authoritative score if present, otherwise the derived one.
    pub fn score(&self) -> u32 {
        self.reported_score.unwrap_or_else(|| self.derived_score())
    }

    /// Best total over visible cards, demoting aces from 11 to 1 while bust.
    pub fn derived_score(&self) -> u32 {
        let mut total = 0;
        let mut soft_aces = 0;
        for card in &self.cards {
            if let Card::Face { rank, .. } = card {
                total += rank.points();
                if *rank == Rank::Ace {
                    soft_aces += 1;
                }
            }
        }
        while total > 21 && soft_aces > 0 {
            total -= 10;
            soft_aces -= 1;
        }
        total
    }

    pub fn is_bust(&self) -> bool {
        self.score() > 21
    }

    pub fn is_blackjack(&self) -> bool {
        self.cards.len() == 2 && self.score() == 21
    }

    pub fn has_hidden_card(&self) -> bool {
        self.cards.iter().any(Card::is_hidden)
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// The house. Holds a hand, never chips or bets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dealer {
    #[serde(flatten)]
    pub hand: Hand,
}

/// A snapshot violated a structural invariant and cannot be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFault {
    #[error("active participant {0} is not seated in the session")]
    DanglingActiveParticipant(ParticipantId),
    #[error("participant {0} appears more than once")]
    DuplicateParticipant(ParticipantId),
}

/// One room as last stated by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "id")]
    pub session_id: RoomId,

    /// Seated participants in coordinator order
    #[serde(rename = "players", default)]
    pub participants: Vec<Participant>,

    #[serde(default)]
    pub dealer: Dealer,

    /// Whose turn it is during `Playing`
    #[serde(rename = "currentPlayer", default)]
    pub active_participant_id: Option<ParticipantId>,

    #[serde(rename = "gamePhase")]
    pub phase: Phase,

    #[serde(rename = "pot", default)]
    pub pot_total: u64,

    /// Free-text annotation shown to players
    #[serde(rename = "message", default)]
    pub status_message: String,
}

impl Session {
    /// Create an empty waiting session.
    pub fn new(session_id: RoomId) -> Self {
        Self {
            session_id,
            participants: Vec::new(),
            dealer: Dealer::default(),
            active_participant_id: None,
            phase: Phase::Waiting,
            pot_total: 0,
            status_message: String::new(),
        }
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    pub fn has_participant(&self, id: &ParticipantId) -> bool {
        self.participant(id).is_some()
    }

    pub fn active_participant(&self) -> Option<&Participant> {
        self.active_participant_id
            .as_ref()
            .and_then(|id| self.participant(id))
    }

    /// Check if it is `id`'s turn.
    pub fn is_turn_of(&self, id: &ParticipantId) -> bool {
        self.phase == Phase::Playing && self.active_participant_id.as_ref() == Some(id)
    }

    /// Replace the entry with the same id in place, or append.
    /// Returns `true` if a new entry was appended.
    pub fn upsert_participant(&mut self, participant: Participant) -> bool {
        match self.participant_mut(&participant.id) {
            Some(existing) => {
                *existing = participant;
                false
            }
            None => {
                self.participants.push(participant);
                true
            }
        }
    }

    /// Remove a participant by id.
    pub fn remove_participant(&mut self, id: &ParticipantId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| &p.id == id)?;
        Some(self.participants.remove(index))
    }

    /// Check the roster invariants a displayable session must satisfy.
    pub fn validate(&self) -> Result<(), IntegrityFault> {
        let mut seen = HashSet::with_capacity(self.participants.len());
        for participant in &self.participants {
            if !seen.insert(&participant.id) {
                return Err(IntegrityFault::DuplicateParticipant(participant.id.clone()));
            }
        }

        if let Some(active) = &self.active_participant_id {
            if !seen.contains(active) {
                return Err(IntegrityFault::DanglingActiveParticipant(active.clone()));
            }
        }

        Ok(())
    }
}
