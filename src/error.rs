//! Crate-level error types for command execution, placement and persistence.

/// Error returned when a command cannot be executed.
///
/// Every variant is delivered to the caller as a structured failure; none of
/// them leave the store in the busy state.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// `place-bet` was issued while automation is stopped.
    #[error("Activate the app before placing bets.")]
    NotActive,

    /// Another placement is already in flight.
    ///
    /// Concurrent placements are rejected, never queued.
    #[error("Another bet is currently being processed.")]
    Busy,

    /// The command name is not recognised.
    #[error("Unknown message type: {0}")]
    UnknownCommand(String),

    /// The payload could not be interpreted for the given command.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The downstream placement collaborator failed.
    #[error("bet placement failed: {0}")]
    PlacementFailed(#[from] PlacementError),

    /// The state store actor has exited.
    ///
    /// All store handles were dropped or the actor thread died, so no
    /// further commands can be processed.
    #[error("state store is no longer running")]
    StoreUnavailable,

    /// The command succeeded but its result could not be encoded as JSON.
    #[error("failed to encode command result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CommandError {
    /// Stable machine-readable code for wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::NotActive => "not_active",
            CommandError::Busy => "busy",
            CommandError::UnknownCommand(_) => "unknown_command",
            CommandError::InvalidPayload(_) => "invalid_payload",
            CommandError::PlacementFailed(_) => "placement_failed",
            CommandError::StoreUnavailable => "store_unavailable",
            CommandError::Encode(_) => "encode_failed",
        }
    }
}

/// Error produced by a [`BetPlacer`](crate::BetPlacer).
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// The placement collaborator refused the ticket.
    #[error("placement rejected: {0}")]
    Rejected(String),

    /// The placement collaborator could not be reached.
    #[error("placement transport error: {0}")]
    Transport(String),
}

/// Error returned by a [`StateStorage`](crate::StateStorage) backend.
///
/// Never surfaced to command callers: the store logs it and keeps the
/// in-memory state authoritative.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Disk I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
