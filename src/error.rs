//! WolfCommit Error Types

use thiserror::Error;

use crate::state::NodeAddr;

/// Result type alias for WolfCommit operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfCommit error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Coordination errors
    #[error("not coordinator")]
    NotCoordinator,

    #[error("a transaction is already in progress on this node")]
    TransactionInProgress,

    #[error("prepare phase timed out")]
    PrepareTimeout,

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Link to {0} closed")]
    LinkClosed(NodeAddr),

    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error means the remote end could not be reached
    ///
    /// Unreachable and timeout failures are liveness signals, not faults.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::LinkClosed(_)
                | Error::Network(_)
        )
    }

    /// Check if the operation was refused because this node is not the coordinator
    pub fn is_not_coordinator(&self) -> bool {
        matches!(self, Error::NotCoordinator)
    }
}
