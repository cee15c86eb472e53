//! Error types for the tick database.

use thiserror::Error;

/// Main error type for cursor, loader and stream operations.
#[derive(Debug, Error)]
pub enum TickDbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a closed cursor or loader.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Message type is unknown to the stream, or the payload does not fit it.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// A blocking call was released by a concurrent close.
    #[error("Cursor closed while waiting for data")]
    Closed,

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Stream already exists: {0}")]
    StreamExists(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Database is locked by another process")]
    Locked,

    #[error("Database not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for TickDbError {
    fn from(e: serde_json::Error) -> Self {
        TickDbError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for TickDbError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TickDbError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TickDbError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TickDbError::Deserialization(e.to_string())
    }
}

/// Result type for tick database operations.
pub type Result<T> = std::result::Result<T, TickDbError>;
