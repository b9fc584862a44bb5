//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (event log, sequence counter)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected amount (non-positive, oversized)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed caller input (event name, description, level/bin bounds)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Referenced event does not exist
    #[error("Event not found: seq {0}")]
    EventNotFound(u64),

    /// Referenced donation is already tombstoned
    #[error("Donation already deleted: seq {0}")]
    AlreadyDeleted(u64),

    /// Referenced event is not a deletable donation-like type
    #[error("Event seq {seq} of type {kind} cannot be deleted")]
    NotDeletable {
        /// Sequence number of the rejected target
        seq: u64,
        /// Event type name of the rejected target
        kind: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
