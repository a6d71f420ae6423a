//! Error taxonomy.
//!
//! [`Error`] is what fallible calls return. [`Fault`] is the cloneable subset
//! that the session store keeps as `last_error` for presentation code.

use thiserror::Error;

use crate::state::dispatch::Action;
use crate::state::game::IntegrityFault;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not connected")]
    NotConnected,
    #[error("a connection attempt is already in flight")]
    ConnectInProgress,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("gave up after {attempts} attempts: {cause}")]
    GaveUp { attempts: usize, cause: String },
    #[error("dial timeout")]
    DialTimeout,
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("{action} refused: {reason}")]
    PreconditionFailed { action: Action, reason: &'static str },
    #[error("data integrity fault: {0}")]
    DataIntegrity(#[from] IntegrityFault),
    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("tungstenite error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected ws, wss, http or https)")]
    InvalidScheme(String),
    #[error("invalid value for {key}: {value}")]
    Config { key: &'static str, value: String },
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A condition surfaced to presentation code through the session store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("gave up after {attempts} attempts: {cause}")]
    GaveUp { attempts: usize, cause: String },
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("data integrity fault: {0}")]
    DataIntegrity(IntegrityFault),
}

impl Fault {
    /// Faults after which the projections have been cleared.
    pub fn clears_projection(&self) -> bool {
        !matches!(self, Self::JoinRejected(_))
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::ConnectionFailed(cause) => Self::ConnectionFailed(cause),
            Fault::ConnectionLost(cause) => Self::ConnectionLost(cause),
            Fault::GaveUp { attempts, cause } => Self::GaveUp { attempts, cause },
            Fault::JoinRejected(reason) => Self::JoinRejected(reason),
            Fault::DataIntegrity(fault) => Self::DataIntegrity(fault),
        }
    }
}
