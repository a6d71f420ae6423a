//! Session state for a blackjack client.
//!
//! - `game` - Session snapshot model (cards, hands, phase, roster)
//! - `player` - Participants, local identity, room membership
//! - `connection` - Transport session and reconnection
//! - `store` - Update-notified holder of the current projection
//! - `engine` - Folds inbound messages into the store
//! - `dispatch` - Validates and sends local intents
//!
//! # Architecture
//!
//! ```text
//!   ┌───────────────────────────────────────────────────┐
//!   │                 TransportSession                  │
//!   │      connect / redial / send (at most once)       │
//!   └──────┬────────────────────────────────▲───────────┘
//!          │ TransportEvent                 │ ClientMessage
//!          ▼                                │
//!   ┌──────────────┐  join/leave    ┌───────┴──────────┐
//!   │  Reconciler  │◀───────────────│ ActionDispatcher │◀── local intents
//!   └──────┬───────┘                └───────▲──────────┘
//!          │ one step at a time             │ preconditions
//!          ▼                                │
//!   ┌───────────────────────────────────────┴───────────┐
//!   │  SessionStore: Session, LocalView, connection,    │
//!   │  membership, last_error                           │
//!   └──────────────────────┬────────────────────────────┘
//!                          ▼
//!                presentation (watch::Receiver)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use blackjack_sync::state::{Phase, ParticipantId, Reconciler, RoomId, Session};
//! use blackjack_sync::state::player::Participant;
//!
//! let engine = Reconciler::default();
//! engine.on_connected(ParticipantId::from("sock-1"));
//!
//! let mut session = Session::new(RoomId::from("R1"));
//! session
//!     .participants
//!     .push(Participant::new(ParticipantId::from("sock-1"), "Alice", 1000));
//! engine.on_snapshot(session);
//!
//! let projection = engine.store().current();
//! assert_eq!(projection.phase(), Some(Phase::Waiting));
//! assert_eq!(projection.local().map(|l| l.chips), Some(1000));
//! ```

pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod game;
pub mod player;
pub mod store;

// Re-export commonly used types
pub use connection::{
    Backoff, ConnectionState, Connector, Established, Link, Outbound, ReconnectPolicy,
    TransportEvent, TransportSession,
};
pub use dispatch::{Action, ActionDispatcher};
pub use engine::{Reconciler, Step};
pub use game::{Card, Dealer, Hand, IntegrityFault, Phase, Rank, RoomId, Session, Suit};
pub use player::{
    InvalidTransition, LocalIdentity, LocalView, Membership, MembershipEvent, Participant,
    ParticipantId, ParticipantStatus,
};
pub use store::{FaultRecord, Projection, SessionStore};
