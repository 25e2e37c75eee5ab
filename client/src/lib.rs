//! # Game Client Library
//!
//! Client side of the predictive-state arcade game. Local inputs take effect
//! immediately on a predicted timeline while the server decides what really
//! happened; the client then validates, corrects and smooths its view.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Every local input is buffered and turned into a prediction of its
//! outcome with a type-dependent confidence: arrow placement is
//! deterministic, cursor moves and actions less so. The predicted view is
//! the last authoritative snapshot with all unconfirmed inputs replayed on
//! top, so it never waits for the network.
//!
//! ### Delta Stream
//! The server sends one delta per authoritative sequence step. Deltas are
//! applied strictly in order; duplicates and stale deltas are dropped and a
//! gap in the chain triggers a single `request-state-sync`. The last ten
//! snapshots are kept for validation and rollback.
//!
//! ### Reconciliation
//! When an acknowledged input's outcome differs from its prediction, or the
//! server sends a `rollback-correction`, a reconciliation is opened. Its
//! severity decides how long the entity eases towards the authoritative
//! value (16 to 50ms) and whether buffered inputs are replayed.
//!
//! ## Module Organization
//!
//! ### Prediction Module (`prediction`)
//! - Bounded, timestamp-ordered input buffer
//! - Prediction lifecycle (created, validated, corrected, expired)
//! - Rolling one-second confidence and divergence detection
//! - Per-entity interpolation records
//!
//! ### Reconciliation Module (`reconciliation`)
//! - Severity and smoothing derived from the correction set
//! - Input replay descriptors preserving original timestamps
//! - Bounded history of finished reconciliations
//!
//! ### Sync Module (`sync`)
//! - I/O-free protocol driver tying prediction and reconciliation together
//!
//! ### Network Module (`network`)
//! - Websocket connection and the client run loop
//!
//! ### Input Module (`input`)
//! - Random-walk bot used by the headless binary
//!
//! ## Usage Example
//!
//! ```rust
//! use client::sync::SyncClient;
//! use shared::{current_timestamp, Position};
//!
//! let mut sync = SyncClient::new("player-1");
//! let join = sync.join("Alice", "red");
//! let input = sync.move_cursor(Position::new(100.0, 120.0), current_timestamp())?;
//! // send `join` and `input` over the connection, then feed every
//! // decoded server message back in:
//! // let replies = sync.handle_message(message, current_timestamp());
//! # let _ = (join, input);
//! # Ok::<(), client::PredictionError>(())
//! ```

pub mod error;
pub mod input;
pub mod network;
pub mod prediction;
pub mod reconciliation;
pub mod sync;

pub use error::{ClientError, PredictionError};
