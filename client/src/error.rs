use shared::{ProtocolError, ValidationError};
use thiserror::Error;

/// Reasons a local input cannot enter the prediction timeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictionError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("input {sequence} at {timestamp}ms is older than the newest buffered input ({newest}ms)")]
    OutOfOrder {
        sequence: u32,
        timestamp: u64,
        newest: u64,
    },

    #[error("unknown prediction {0}")]
    UnknownPrediction(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server closed the connection")]
    ConnectionClosed,
}
