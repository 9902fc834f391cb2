//! Error types for the collaboration layer.

use tessera_core::CrdtError;
use thiserror::Error;

/// Authentication errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The token does not have the expected shape or payload.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The authentication endpoint refused to issue a token.
    #[error("authentication rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced by a room.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoomError {
    /// The server closed the socket with a rejection code. Terminal.
    #[error("connection rejected ({code}): {reason}")]
    Rejected { code: u16, reason: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// An inbound frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("storage has not been loaded")]
    StorageNotLoaded,

    #[error(transparent)]
    Crdt(#[from] CrdtError),

    /// The room task has shut down.
    #[error("room is closed")]
    Closed,
}
