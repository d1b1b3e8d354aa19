//! Error types
//!
//! Crate-wide errors for startup and network plumbing. Stock outcomes
//! (declined reservations, unknown items) live in [`crate::ledger::StockError`]
//! because callers branch on them as ordinary results.

use std::time::Duration;

use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration detected at startup
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Peer sent something the protocol does not allow at this point
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connect or handshake did not finish in time
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Incoming frame exceeded the configured limit
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

/// Result alias for crate operations
pub type Result<T> = std::result::Result<T, Error>;
