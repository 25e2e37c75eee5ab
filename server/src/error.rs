use shared::ProtocolError;
use thiserror::Error;

/// Why an input was dropped by the per-player rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded,

    #[error("BURST_LIMIT_EXCEEDED")]
    BurstLimitExceeded,
}

impl RateLimitError {
    pub fn code(&self) -> &'static str {
        match self {
            RateLimitError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            RateLimitError::BurstLimitExceeded => "BURST_LIMIT_EXCEEDED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("thresholds for {metric} must be finite")]
    NotFinite { metric: String },

    #[error("{metric}: warning {warning} must be {expected} than critical {critical}")]
    InvalidOrdering {
        metric: String,
        warning: f64,
        critical: f64,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("server full ({0} players)")]
    ServerFull(usize),

    #[error("player id {0} is already connected")]
    PlayerIdTaken(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
