//! Blackjack Sync Library
//!
//! Client-side state synchronization for a multiplayer blackjack session.
//! The coordinator is authoritative; this crate keeps a local mirror of its
//! state and decides which local intents are worth sending.
//!
//! # Overview
//!
//! - **Transport Session** - One duplex connection to the coordinator with
//!   bounded, policy-driven reconnection and at-most-once sends.
//!
//! - **Identity Resolver** - Tells the local participant apart from everyone
//!   else using the connection id assigned at handshake.
//!
//! - **Reconciliation Engine** - Folds snapshots and incremental events into
//!   the session and local projections, one message at a time.
//!
//! - **Action Dispatcher** - Checks each intent against the current phase and
//!   local status before anything is sent.
//!
//! - **Session Store** - Read-only, update-notified projections for
//!   presentation code.
//!
//! # Design Principles
//!
//! 1. **Snapshots win** - A full snapshot replaces whatever was shown. Any
//!    inconsistency is handled by clearing and waiting for the next one.
//!
//! 2. **Nothing stale is shown** - Disconnects, leaves, and integrity faults
//!    clear the projections.
//!
//! 3. **No rules engine** - Dealing, scoring, and payouts happen remotely;
//!    their effects arrive in snapshots.
//!
//! # Example
//!
//! ```rust,no_run
//! use blackjack_sync::{ClientConfig, GameClient, RoomId};
//!
//! # async fn run() -> blackjack_sync::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let client = GameClient::with_websocket(&config);
//! client.connect()?;
//!
//! let mut updates = client.subscribe();
//! while updates.changed().await.is_ok() {
//!     let projection = updates.borrow_and_update().clone();
//!     if projection.is_connected() && projection.membership().room_id().is_none() {
//!         client.actions().join("Alice", RoomId::from("table-1"))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod ws;

pub use client::GameClient;
pub use config::ClientConfig;
pub use error::{Error, Fault, Result};
pub use protocol::{ClientMessage, ServerMessage};
pub use state::*;
