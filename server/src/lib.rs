//! # Game Server Library
//!
//! Authoritative server for the predictive-state arcade game. It owns the
//! canonical game state, admits and applies client inputs, and replicates
//! state to clients as chains of deltas paced by an adaptive tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! One [`game::GameInstance`] per server holds the state, runs the round
//! lifecycle (WAITING -> ACTIVE -> ENDING -> WAITING) and records a snapshot
//! after every accepted mutation. Clients predict locally and conform to
//! whatever the server decides.
//!
//! ### Input Pipeline
//! Inputs arrive as `predictive-input` frames carrying the client's expected
//! outcome. They are validated, rate limited per player, buffered, and
//! applied at the next tick boundary in timestamp order across players.
//! Every applied input is acknowledged; a prediction that missed the
//! authoritative outcome additionally earns a `rollback-correction`.
//!
//! ### State Replication
//! Each tick emits one `delta-game-state` per sequence step since the last
//! broadcast, or a full `game-state` when the chain fell out of the snapshot
//! history. Messages are scored per connection by the network optimizer and
//! coalesced by the batching layer; urgent kinds bypass batching.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! [`network::Server::run`] is the only place state is mutated. Connection
//! tasks forward decoded text frames over a channel and drain a bounded
//! outbound queue, so a slow peer never blocks the simulation. Concurrent
//! readers use the snapshot published once per tick via
//! [`network::Server::subscribe`].
//!
//! ### Adaptive Pacing
//! RTT samples from ping/pong, outbound loss and bandwidth feed a per
//! connection quality score. Every few ticks the optimizer moves the tick
//! rate towards a target derived from player count and network health, by
//! at most 20% per step and always within [20, 60] Hz.
//!
//! ## Module Organization
//!
//! - `client_manager`: joined players, input buffering and status tracking
//! - `rate_limiter`: per-player sliding-window input caps
//! - `game`: the game instance, snapshot chain and correction building
//! - `optimizer`: connection quality, tick-rate control, message priority
//! - `batching`: per-connection coalescing with an adaptive flush delay
//! - `metrics`: performance figures, thresholds and alerts
//! - `http`: `GET /metrics` and `PUT /metrics/thresholds`
//! - `network`: websocket transport and the main loop
//! - `config`: TOML configuration with per-field defaults
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     tokio::spawn(server::http::serve("127.0.0.1:8081".parse()?, server.monitor()));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod batching;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod rate_limiter;

pub use error::{JoinError, MetricsError, RateLimitError, ServerError};

/// Identifies one websocket connection for its lifetime.
pub type ConnectionId = u64;
