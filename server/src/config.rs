//! Server configuration.
//!
//! Every section and field carries a serde default, so an empty or partial
//! TOML file is valid. Command line flags are applied on top by the binary.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_TICK_RATE: f32 = 20.0;
pub const MAX_TICK_RATE: f32 = 60.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ServerError> {
        let config: ServerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |reason: String| Err(ServerError::InvalidConfig(reason));

        if !(MIN_TICK_RATE..=MAX_TICK_RATE).contains(&self.game.base_tick_rate) {
            return invalid(format!(
                "game.base_tick_rate {} is outside [{}, {}]",
                self.game.base_tick_rate, MIN_TICK_RATE, MAX_TICK_RATE
            ));
        }
        if self.server.max_clients == 0 {
            return invalid("server.max_clients must be at least 1".to_string());
        }
        if self.game.min_players == 0 {
            return invalid("game.min_players must be at least 1".to_string());
        }
        if self.game.snapshot_history == 0 {
            return invalid("game.snapshot_history must be at least 1".to_string());
        }
        if self.rate_limit.max_per_second == 0 || self.rate_limit.burst_limit == 0 {
            return invalid("rate_limit caps must be at least 1".to_string());
        }
        if self.rate_limit.burst_window_ms == 0
            || self.rate_limit.burst_window_ms > self.rate_limit.window_ms
        {
            return invalid("rate_limit.burst_window_ms must be within (0, window_ms]".to_string());
        }
        let batching = &self.batching;
        if !(batching.min_delay_ms <= batching.default_delay_ms
            && batching.default_delay_ms <= batching.max_delay_ms)
        {
            return invalid(
                "batching delays must satisfy min_delay_ms <= default_delay_ms <= max_delay_ms"
                    .to_string(),
            );
        }
        if self.network.bandwidth_cap_kbps <= 0.0 {
            return invalid("network.bandwidth_cap_kbps must be positive".to_string());
        }
        if self.network.outbound_queue == 0 {
            return invalid("network.outbound_queue must be at least 1".to_string());
        }
        if self.network.ping_interval_ms == 0 {
            return invalid("network.ping_interval_ms must be at least 1".to_string());
        }
        if !self.game.mouse_speed.is_finite() {
            return invalid(format!(
                "game.mouse_speed {} must be finite",
                self.game.mouse_speed
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http_port: default_http_port(),
            max_clients: default_max_clients(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_tick_rate")]
    pub base_tick_rate: f32,
    #[serde(default = "default_min_players")]
    pub min_players: usize,
    #[serde(default = "default_mice_per_round")]
    pub mice_per_round: usize,
    #[serde(default = "default_round_duration")]
    pub round_duration_secs: u64,
    #[serde(default = "default_ending_duration")]
    pub ending_duration_secs: u64,
    #[serde(default = "default_snapshot_history")]
    pub snapshot_history: usize,
    #[serde(default = "default_mouse_speed")]
    pub mouse_speed: f32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            base_tick_rate: default_tick_rate(),
            min_players: default_min_players(),
            mice_per_round: default_mice_per_round(),
            round_duration_secs: default_round_duration(),
            ending_duration_secs: default_ending_duration(),
            snapshot_history: default_snapshot_history(),
            mouse_speed: default_mouse_speed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bandwidth_cap")]
    pub bandwidth_cap_kbps: f32,
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_ms: f32,
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Ticks between two tick-rate adjustments.
    #[serde(default = "default_adjust_every")]
    pub adjust_every_ticks: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bandwidth_cap_kbps: default_bandwidth_cap(),
            latency_threshold_ms: default_latency_threshold(),
            client_timeout_secs: default_client_timeout(),
            ping_interval_ms: default_ping_interval(),
            outbound_queue: default_outbound_queue(),
            adjust_every_ticks: default_adjust_every(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_per_second")]
    pub max_per_second: usize,
    #[serde(default = "default_burst_limit")]
    pub burst_limit: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_second: default_max_per_second(),
            burst_limit: default_burst_limit(),
            window_ms: default_window_ms(),
            burst_window_ms: default_burst_window_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_batch_delay")]
    pub default_delay_ms: f32,
    #[serde(default = "default_min_batch_delay")]
    pub min_delay_ms: f32,
    #[serde(default = "default_max_batch_delay")]
    pub max_delay_ms: f32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_batch_delay(),
            min_delay_ms: default_min_batch_delay(),
            max_delay_ms: default_max_batch_delay(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_http_port() -> u16 {
    8081
}
fn default_max_clients() -> usize {
    shared::MAX_PLAYERS
}
fn default_tick_rate() -> f32 {
    50.0
}
fn default_min_players() -> usize {
    1
}
fn default_mice_per_round() -> usize {
    8
}
fn default_round_duration() -> u64 {
    120
}
fn default_ending_duration() -> u64 {
    5
}
fn default_snapshot_history() -> usize {
    10
}
fn default_mouse_speed() -> f32 {
    80.0
}
fn default_bandwidth_cap() -> f32 {
    1000.0
}
fn default_latency_threshold() -> f32 {
    150.0
}
fn default_client_timeout() -> u64 {
    30
}
fn default_ping_interval() -> u64 {
    1000
}
fn default_outbound_queue() -> usize {
    256
}
fn default_adjust_every() -> u64 {
    30
}
fn default_max_per_second() -> usize {
    60
}
fn default_burst_limit() -> usize {
    10
}
fn default_window_ms() -> u64 {
    1000
}
fn default_burst_window_ms() -> u64 {
    100
}
fn default_batch_delay() -> f32 {
    5.0
}
fn default_min_batch_delay() -> f32 {
    3.0
}
fn default_max_batch_delay() -> f32 {
    15.0
}
