//! Per-connection batching of outbound messages.
//!
//! Non-urgent messages for a connection are coalesced and flushed together
//! once the adaptive delay has elapsed since the first of them was queued.
//! Urgent messages flush the connection's pending batch (to keep ordering)
//! and go out immediately behind it.

use crate::config::BatchingConfig;
use crate::optimizer::MessagePolicy;
use crate::ConnectionId;
use log::debug;
use shared::{Batch, CompressionTracker, CompressionTrend, Message};
use std::collections::HashMap;

#[derive(Debug)]
struct PendingBatch {
    messages: Vec<Message>,
    first_enqueued_at: u64,
}

/// Wraps coalesced messages into one frame: a lone message stays as is.
pub fn into_frame(mut messages: Vec<Message>) -> Option<Message> {
    match messages.len() {
        0 => None,
        1 => messages.pop(),
        _ => Some(Message::Batch(Batch { messages })),
    }
}

pub struct BatchScheduler {
    config: BatchingConfig,
    compression: CompressionTracker,
    delay_ms: f32,
    pending: HashMap<ConnectionId, PendingBatch>,
}

impl BatchScheduler {
    pub fn new(config: BatchingConfig) -> Self {
        Self {
            delay_ms: config.default_delay_ms,
            config,
            compression: CompressionTracker::default(),
            pending: HashMap::new(),
        }
    }

    pub fn delay_ms(&self) -> f32 {
        self.delay_ms
    }

    pub fn compression_average(&self) -> Option<f32> {
        self.compression.average()
    }

    pub fn compression_trend(&self) -> CompressionTrend {
        self.compression.trend()
    }

    /// Feeds one observed compression ratio and recomputes the delay: poorly
    /// compressing (busy) updates wait longer, well compressing ones flush
    /// sooner.
    pub fn record_compression(&mut self, ratio: f32) {
        if !ratio.is_finite() {
            return;
        }
        self.compression.record_ratio(ratio);
        if let Some(average) = self.compression.average() {
            let span = self.config.max_delay_ms - self.config.min_delay_ms;
            self.delay_ms = (self.config.max_delay_ms - span * average)
                .clamp(self.config.min_delay_ms, self.config.max_delay_ms);
        }
    }

    /// Queues `message` for `connection_id`. Returns the frames that must be
    /// sent right away, in order; empty when the message was batched.
    pub fn enqueue(&mut self, connection_id: ConnectionId, message: Message, now: u64) -> Vec<Message> {
        if MessagePolicy::for_kind(message.kind()).is_urgent() {
            let mut frames: Vec<Message> = self.flush_connection(connection_id).into_iter().collect();
            frames.push(message);
            return frames;
        }

        self.pending
            .entry(connection_id)
            .or_insert_with(|| PendingBatch {
                messages: Vec::new(),
                first_enqueued_at: now,
            })
            .messages
            .push(message);
        Vec::new()
    }

    /// Removes and returns every batch whose delay has elapsed.
    pub fn due(&mut self, now: u64) -> Vec<(ConnectionId, Message)> {
        let delay = self.delay_ms.ceil() as u64;
        let ready: Vec<ConnectionId> = self
            .pending
            .iter()
            .filter(|(_, batch)| now.saturating_sub(batch.first_enqueued_at) >= delay)
            .map(|(id, _)| *id)
            .collect();

        let mut frames: Vec<(ConnectionId, Message)> = ready
            .into_iter()
            .filter_map(|id| self.flush_connection(id).map(|frame| (id, frame)))
            .collect();
        frames.sort_by_key(|(id, _)| *id);
        frames
    }

    /// Milliseconds until the next batch is due, `None` when nothing waits.
    pub fn time_until_flush(&self, now: u64) -> Option<u64> {
        let delay = self.delay_ms.ceil() as u64;
        self.pending
            .values()
            .map(|batch| (batch.first_enqueued_at + delay).saturating_sub(now))
            .min()
    }

    /// Takes the pending batch of one connection regardless of its timer.
    pub fn flush_connection(&mut self, connection_id: ConnectionId) -> Option<Message> {
        let batch = self.pending.remove(&connection_id)?;
        debug!(
            "Flushing {} messages for connection {}",
            batch.messages.len(),
            connection_id
        );
        into_frame(batch.messages)
    }

    pub fn pending_connections(&self) -> usize {
        self.pending.len()
    }
}
