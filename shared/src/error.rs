//! Error types for state mutation, wire decoding and peer validation.

use crate::state::GamePhase;
use crate::InputType;
use thiserror::Error;

/// Reasons an authoritative mutation is rejected. A rejected mutation leaves
/// the state untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("player limit of {0} reached")]
    TooManyPlayers(usize),

    #[error("player {0} already exists")]
    DuplicatePlayer(String),

    #[error("unknown player {0}")]
    UnknownPlayer(String),

    #[error("entity {0} already exists")]
    DuplicateEntity(String),

    #[error("unknown entity {0}")]
    UnknownEntity(String),

    #[error("position ({x:.1}, {y:.1}) is outside the {width}x{height} board")]
    OutOfBounds {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("mutation not allowed while {0:?}")]
    PhaseLocked(GamePhase),
}

/// Errors raised while decoding a wire message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has no `type` discriminator")]
    MissingType,

    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    #[error("invalid `{message_type}` payload: {source}")]
    InvalidPayload {
        message_type: String,
        source: serde_json::Error,
    },
}

/// Peer-supplied data that decoded fine but violates a protocol constraint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("player id must not be empty")]
    EmptyPlayerId,

    #[error("unknown input type")]
    UnknownInputType,

    #[error("{0:?} input is missing required data")]
    MissingInputData(InputType),

    #[error("input timestamp is {skew_ms}ms away from the server clock")]
    StaleTimestamp { skew_ms: u64 },

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f32),

    #[error("smoothing duration {0}ms is outside [16, 50]")]
    SmoothingOutOfRange(f32),

    #[error("rollback target {target} is not behind current sequence {current}")]
    RollbackNotBehind { target: u32, current: u32 },

    #[error("correction for {0} is not listed in affected entities")]
    AffectedEntitiesIncomplete(String),

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },
}

/// Errors raised while folding a delta into a snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeltaError {
    #[error("delta expects base sequence {found} but snapshot is at {expected}")]
    BaseMismatch { expected: u32, found: u32 },

    #[error("first-sight entry for {0} is missing fields")]
    IncompleteEntry(String),
}
