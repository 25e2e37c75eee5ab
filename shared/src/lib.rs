//! Data model and wire protocol shared by the authoritative server and the
//! predicting client.

pub mod correction;
pub mod delta;
mod error;
pub mod protocol;
pub mod state;

pub use correction::{Easing, Severity, SmoothingConfig};
pub use delta::{
    apply_delta, compression_ratio, compute_delta, CompressionTracker, CompressionTrend,
    DeltaState, EntityDelta, PlayerDelta,
};
pub use error::{DeltaError, ProtocolError, StateError, ValidationError};
pub use protocol::{
    Batch, CorrectionEntry, CorrectionPriority, CorrectionType, CorrectionValue, ErrorMessage,
    FullState, InputAcknowledgment, InputData, InputRejected, InputType, JoinGame, Message,
    MessageKind, PerformanceReport, Ping, PlayerInput, PredictionInfo, PredictionPayload,
    PredictiveInput, Pong, RequestStateSync, RollbackCorrection,
};
pub use state::{
    Arrow, AuthoritativeState, BoardBounds, Entity, EntityKind, EntityStatus, GamePhase,
    PerformanceSnapshot, Player, PlayerStatus,
};

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const BOARD_WIDTH: f32 = 800.0;
pub const BOARD_HEIGHT: f32 = 600.0;
pub const MAX_PLAYERS: usize = 32;
pub const MAX_ARROWS_PER_PLAYER: usize = 3;
pub const MAX_NAME_LENGTH: usize = 32;

/// Accepted skew between a client input timestamp and the server clock.
pub const INPUT_TIMESTAMP_TOLERANCE_MS: u64 = 1000;

/// A prediction at least this accurate is confirmed, below it is corrected.
pub const VALIDATION_ACCURACY: f32 = 0.9;

pub const MIN_SMOOTHING_MS: f32 = 16.0;
pub const MAX_SMOOTHING_MS: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, target: &Position, t: f32) -> Position {
        Position {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Velocity in pixels per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Velocity {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit vector pointing along the direction, y grows downwards.
    pub fn unit(self) -> (f32, f32) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// Advances a sequence number. `u32::MAX` rolls over to 0.
pub fn next_sequence(sequence: u32) -> u32 {
    sequence.wrapping_add(1)
}

/// True when `sequence` is `reference` or precedes it, across the
/// `u32::MAX -> 0` rollover.
pub fn is_at_or_before(sequence: u32, reference: u32) -> bool {
    reference.wrapping_sub(sequence) < u32::MAX / 2
}

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
