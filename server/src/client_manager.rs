//! Connected players and their input pipeline.
//!
//! This module handles the server-side bookkeeping of joined players:
//! - Player lifecycle (join, leave, idle timeout)
//! - Input buffering and chronological ordering for deterministic application
//! - Input status tracking: PENDING -> ACKNOWLEDGED | REJECTED | TIMEOUT
//! - Duplicate detection so statistics count every input sequence once
//!
//! All times are wall-clock milliseconds supplied by the caller.

use crate::error::JoinError;
use crate::ConnectionId;
use log::{debug, info};
use serde::Serialize;
use shared::PredictiveInput;
use std::collections::HashMap;

/// Unacknowledged inputs switch to TIMEOUT after this long.
pub const INPUT_ACK_TIMEOUT_MS: u64 = 5_000;
/// Tracked inputs older than this are purged.
pub const INPUT_RETENTION_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputStatus {
    Pending,
    Acknowledged,
    Rejected(String),
    Timeout,
}

#[derive(Debug, Clone)]
pub struct TrackedInput {
    pub input: PredictiveInput,
    pub received_at: u64,
    pub status: InputStatus,
}

impl TrackedInput {
    pub fn sequence(&self) -> u32 {
        self.input.input.sequence
    }
}

/// Per-player input counters. Every sequence contributes at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStats {
    pub received: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAdmission {
    Queued,
    Duplicate,
    UnknownPlayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First acknowledgment, with the time the input spent queued.
    Acknowledged { processing_time: u64 },
    Duplicate,
    Unknown,
}

/// A joined player and their buffered inputs.
#[derive(Debug)]
pub struct Client {
    pub player_id: String,
    pub connection_id: ConnectionId,
    /// Last time any frame arrived from this player.
    pub last_seen: u64,
    /// Highest input sequence acknowledged so far.
    pub last_processed_input: Option<u32>,
    inputs: Vec<TrackedInput>,
    stats: InputStats,
}

impl Client {
    pub fn new(player_id: &str, connection_id: ConnectionId, now: u64) -> Self {
        Self {
            player_id: player_id.to_string(),
            connection_id,
            last_seen: now,
            last_processed_input: None,
            inputs: Vec::new(),
            stats: InputStats::default(),
        }
    }

    fn find_mut(&mut self, sequence: u32) -> Option<&mut TrackedInput> {
        self.inputs
            .iter_mut()
            .find(|tracked| tracked.sequence() == sequence)
    }

    /// Buffers an input in sequence order. Sequences that are already
    /// tracked, or at or below the acknowledged watermark, are duplicates.
    pub fn add_input(&mut self, input: PredictiveInput, now: u64) -> InputAdmission {
        self.last_seen = now;
        let sequence = input.input.sequence;
        let already_processed = self
            .last_processed_input
            .is_some_and(|last| sequence <= last);
        if already_processed || self.find_mut(sequence).is_some() {
            self.stats.duplicates += 1;
            return InputAdmission::Duplicate;
        }

        self.stats.received += 1;
        self.inputs.push(TrackedInput {
            input,
            received_at: now,
            status: InputStatus::Pending,
        });
        self.inputs.sort_by_key(TrackedInput::sequence);
        InputAdmission::Queued
    }

    pub fn pending_inputs(&self) -> impl Iterator<Item = &TrackedInput> {
        self.inputs
            .iter()
            .filter(|tracked| tracked.status == InputStatus::Pending)
    }

    pub fn input_status(&self, sequence: u32) -> Option<&InputStatus> {
        self.inputs
            .iter()
            .find(|tracked| tracked.sequence() == sequence)
            .map(|tracked| &tracked.status)
    }

    pub fn stats(&self) -> &InputStats {
        &self.stats
    }

    pub fn is_timed_out(&self, now: u64, timeout_ms: u64) -> bool {
        now.saturating_sub(self.last_seen) > timeout_ms
    }
}

/// Joined players keyed by player id.
///
/// Owned by the server instance; nothing here is process-global, so several
/// game instances (or tests) can each hold their own manager.
pub struct ClientManager {
    clients: HashMap<String, Client>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    pub fn add_client(
        &mut self,
        player_id: &str,
        connection_id: ConnectionId,
        now: u64,
    ) -> Result<(), JoinError> {
        if self.clients.contains_key(player_id) {
            return Err(JoinError::PlayerIdTaken(player_id.to_string()));
        }
        if self.clients.len() >= self.max_clients {
            return Err(JoinError::ServerFull(self.max_clients));
        }

        info!("Player {} joined on connection {}", player_id, connection_id);
        self.clients
            .insert(player_id.to_string(), Client::new(player_id, connection_id, now));
        Ok(())
    }

    pub fn remove_client(&mut self, player_id: &str) -> Option<Client> {
        let client = self.clients.remove(player_id)?;
        info!("Player {} left", player_id);
        Some(client)
    }

    pub fn get(&self, player_id: &str) -> Option<&Client> {
        self.clients.get(player_id)
    }

    pub fn find_by_connection(&self, connection_id: ConnectionId) -> Option<&str> {
        self.clients
            .values()
            .find(|client| client.connection_id == connection_id)
            .map(|client| client.player_id.as_str())
    }

    pub fn touch(&mut self, player_id: &str, now: u64) {
        if let Some(client) = self.clients.get_mut(player_id) {
            client.last_seen = now;
        }
    }

    pub fn add_input(&mut self, player_id: &str, input: PredictiveInput, now: u64) -> InputAdmission {
        match self.clients.get_mut(player_id) {
            Some(client) => client.add_input(input, now),
            None => InputAdmission::UnknownPlayer,
        }
    }

    /// Records an input that failed validation before it was queued.
    pub fn record_rejection(&mut self, player_id: &str) {
        if let Some(client) = self.clients.get_mut(player_id) {
            client.stats.received += 1;
            client.stats.rejected += 1;
        }
    }

    /// All pending inputs across players, oldest input timestamp first. Ties
    /// keep per-player sequence order.
    pub fn get_chronological_inputs(&self) -> Vec<(String, TrackedInput)> {
        let mut all_inputs: Vec<(String, TrackedInput)> = self
            .clients
            .values()
            .flat_map(|client| {
                client
                    .pending_inputs()
                    .map(move |tracked| (client.player_id.clone(), tracked.clone()))
            })
            .collect();

        all_inputs.sort_by(|(a_id, a), (b_id, b)| {
            a.input
                .input
                .timestamp
                .cmp(&b.input.input.timestamp)
                .then_with(|| a_id.cmp(b_id))
                .then_with(|| a.sequence().cmp(&b.sequence()))
        });
        all_inputs
    }

    pub fn acknowledge_input(&mut self, player_id: &str, sequence: u32, now: u64) -> AckOutcome {
        let Some(client) = self.clients.get_mut(player_id) else {
            return AckOutcome::Unknown;
        };
        let Some(tracked) = client.find_mut(sequence) else {
            if client.last_processed_input.is_some_and(|last| sequence <= last) {
                client.stats.duplicates += 1;
                return AckOutcome::Duplicate;
            }
            return AckOutcome::Unknown;
        };
        if tracked.status != InputStatus::Pending {
            client.stats.duplicates += 1;
            return AckOutcome::Duplicate;
        }

        tracked.status = InputStatus::Acknowledged;
        let processing_time = now.saturating_sub(tracked.received_at);
        client.stats.acknowledged += 1;
        client.last_processed_input = Some(
            client
                .last_processed_input
                .map_or(sequence, |last| last.max(sequence)),
        );
        AckOutcome::Acknowledged { processing_time }
    }

    /// Marks a queued input REJECTED. Returns false if it was not pending.
    pub fn reject_input(&mut self, player_id: &str, sequence: u32, reason: &str) -> bool {
        let Some(client) = self.clients.get_mut(player_id) else {
            return false;
        };
        match client.find_mut(sequence) {
            Some(tracked) if tracked.status == InputStatus::Pending => {
                tracked.status = InputStatus::Rejected(reason.to_string());
                client.stats.rejected += 1;
                true
            }
            _ => false,
        }
    }

    /// Moves stale pending inputs to TIMEOUT and purges anything older than
    /// the retention window. Returns the `(player, sequence)` pairs that just
    /// timed out.
    pub fn check_input_timeouts(&mut self, now: u64) -> Vec<(String, u32)> {
        let mut timed_out = Vec::new();
        for client in self.clients.values_mut() {
            for tracked in client.inputs.iter_mut() {
                let age = now.saturating_sub(tracked.received_at);
                if tracked.status == InputStatus::Pending && age > INPUT_ACK_TIMEOUT_MS {
                    tracked.status = InputStatus::Timeout;
                    client.stats.timed_out += 1;
                    timed_out.push((client.player_id.clone(), tracked.sequence()));
                }
            }
            client
                .inputs
                .retain(|tracked| now.saturating_sub(tracked.received_at) <= INPUT_RETENTION_MS);
        }
        if !timed_out.is_empty() {
            debug!("{} inputs timed out", timed_out.len());
        }
        timed_out
    }

    /// Removes players idle for longer than `timeout_ms` and returns them.
    pub fn check_timeouts(&mut self, now: u64, timeout_ms: u64) -> Vec<Client> {
        let idle: Vec<String> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(now, timeout_ms))
            .map(|client| client.player_id.clone())
            .collect();

        idle.iter()
            .filter_map(|player_id| self.remove_client(player_id))
            .collect()
    }

    pub fn stats(&self) -> HashMap<String, InputStats> {
        self.clients
            .iter()
            .map(|(id, client)| (id.clone(), client.stats.clone()))
            .collect()
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
