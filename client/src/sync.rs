//! Delta stream driver.
//!
//! [`SyncClient`] is the client half of the protocol without any I/O: it
//! turns local actions into `predictive-input` messages, folds server
//! messages into the predicted and authoritative timelines, and returns
//! whatever must be sent back.

use crate::error::PredictionError;
use crate::prediction::{status_payload, PredictedState, PredictionOutcome};
use crate::reconciliation::ReconciliationManager;
use log::{debug, info, trace, warn};
use shared::{
    apply_delta, is_at_or_before, AuthoritativeState, CorrectionEntry, CorrectionType,
    CorrectionValue, DeltaState, Direction, InputAcknowledgment, InputRejected, InputType,
    JoinGame, Message, PerformanceReport, Ping, PlayerInput, PlayerStatus, Pong, Position,
    PredictionPayload, RequestStateSync, RollbackCorrection, SmoothingConfig, MIN_SMOOTHING_MS,
};
use std::collections::VecDeque;

/// Authoritative snapshots kept for validation and rollback.
pub const SNAPSHOT_HISTORY: usize = 10;
const RTT_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub full_states: u64,
    pub deltas_applied: u64,
    pub deltas_discarded: u64,
    pub gaps_detected: u64,
    pub resyncs_requested: u64,
    pub corrections_received: u64,
    pub inputs_rejected: u64,
}

/// An acknowledged input waiting for the snapshot that reflects it.
#[derive(Debug, Clone)]
struct PendingValidation {
    prediction_id: String,
    input_type: InputType,
    input_sequence: u32,
    state_sequence: u32,
}

/// Server-confirmed result of one input.
struct ConfirmedOutcome {
    entity_id: String,
    correction_type: CorrectionType,
    payload: PredictionPayload,
    value: CorrectionValue,
}

pub struct SyncClient {
    player_id: String,
    prediction: PredictedState,
    reconciliation: ReconciliationManager,
    history: VecDeque<AuthoritativeState>,
    pending_validations: Vec<PendingValidation>,
    awaiting_sync: bool,
    input_sequence: u32,
    rtt_samples: VecDeque<f32>,
    stats: SyncStats,
}

impl SyncClient {
    pub fn new(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            prediction: PredictedState::new(player_id),
            reconciliation: ReconciliationManager::new(),
            history: VecDeque::with_capacity(SNAPSHOT_HISTORY),
            pending_validations: Vec::new(),
            awaiting_sync: false,
            input_sequence: 0,
            rtt_samples: VecDeque::with_capacity(RTT_SAMPLES),
            stats: SyncStats::default(),
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn join(&self, name: &str, color: &str) -> Message {
        Message::JoinGame(JoinGame {
            player_id: self.player_id.clone(),
            name: name.to_string(),
            color: color.to_string(),
        })
    }

    pub fn latest_state(&self) -> Option<&AuthoritativeState> {
        self.history.back()
    }

    /// Sequence of the newest authoritative snapshot.
    pub fn sequence(&self) -> Option<u32> {
        self.latest_state().map(AuthoritativeState::sequence)
    }

    pub fn snapshot_at(&self, sequence: u32) -> Option<&AuthoritativeState> {
        self.history
            .iter()
            .rev()
            .find(|state| state.sequence() == sequence)
    }

    pub fn prediction(&self) -> &PredictedState {
        &self.prediction
    }

    pub fn reconciliation(&self) -> &ReconciliationManager {
        &self.reconciliation
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn is_awaiting_sync(&self) -> bool {
        self.awaiting_sync
    }

    pub fn is_divergent(&self, now: u64) -> bool {
        self.awaiting_sync || self.prediction.is_divergent(now)
    }

    /// Mean round trip of the last pings, in milliseconds.
    pub fn latency(&self) -> Option<f32> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        Some(self.rtt_samples.iter().sum::<f32>() / self.rtt_samples.len() as f32)
    }

    pub fn move_cursor(&mut self, position: Position, now: u64) -> Result<Message, PredictionError> {
        let sequence = self.next_input_sequence();
        self.submit(PlayerInput::movement(now, sequence, position), now)
    }

    pub fn place_arrow(
        &mut self,
        position: Position,
        direction: Direction,
        now: u64,
    ) -> Result<Message, PredictionError> {
        let sequence = self.next_input_sequence();
        self.submit(PlayerInput::arrow(now, sequence, position, direction), now)
    }

    pub fn action(&mut self, action: &str, now: u64) -> Result<Message, PredictionError> {
        let sequence = self.next_input_sequence();
        self.submit(PlayerInput::action(now, sequence, action), now)
    }

    fn next_input_sequence(&mut self) -> u32 {
        self.input_sequence = shared::next_sequence(self.input_sequence);
        self.input_sequence
    }

    fn submit(&mut self, input: PlayerInput, now: u64) -> Result<Message, PredictionError> {
        let predictive = self.prediction.add_input(input, now)?;
        Ok(Message::PredictiveInput(predictive))
    }

    pub fn ping(&self, now: u64) -> Message {
        Message::Ping(Ping { timestamp: now })
    }

    pub fn performance_report(&self, fps: f32) -> Message {
        Message::PerformanceReport(PerformanceReport {
            player_id: self.player_id.clone(),
            fps,
            latency: self.latency().unwrap_or(0.0),
            prediction_accuracy: self.prediction.metrics().accuracy(),
            reconciliations: self.reconciliation.stats().total,
        })
    }

    /// Folds one server message into the timelines. Batches are unpacked in
    /// order. Returns the messages to send back.
    pub fn handle_message(&mut self, message: Message, now: u64) -> Vec<Message> {
        let mut replies = Vec::new();
        let mut stack = vec![message];
        while let Some(message) = stack.pop() {
            match message {
                Message::Batch(batch) => stack.extend(batch.messages.into_iter().rev()),
                Message::GameState(full) => self.apply_full_state(full.state, now),
                Message::DeltaGameState(delta) => {
                    replies.extend(self.apply_delta(delta, now));
                }
                Message::InputAcknowledgment(ack) => self.on_acknowledgment(&ack, now),
                Message::InputRejected(rejected) => self.on_rejected(&rejected),
                Message::RollbackCorrection(correction) => {
                    replies.extend(self.on_correction(correction, now));
                }
                Message::Ping(ping) => replies.push(Message::Pong(Pong {
                    timestamp: ping.timestamp,
                })),
                Message::Pong(pong) => self.record_rtt(now.saturating_sub(pong.timestamp) as f32),
                Message::Error(error) => warn!("Server error: {}", error.message),
                other => debug!("Ignoring {} from server", other.kind().as_str()),
            }
        }
        replies
    }

    fn record_rtt(&mut self, rtt: f32) {
        if self.rtt_samples.len() == RTT_SAMPLES {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(rtt);
    }

    /// Replaces the timeline with a full snapshot and ends any resync.
    pub fn apply_full_state(&mut self, state: AuthoritativeState, now: u64) {
        let sequence = state.sequence();
        if let Some(current) = self.sequence() {
            if !is_at_or_before(current, sequence) {
                info!("Full state rewinds the timeline from {} to {}", current, sequence);
                self.history.clear();
            }
        }
        if self.awaiting_sync {
            info!("Resynchronized at sequence {}", sequence);
            self.awaiting_sync = false;
            self.reconciliation.clear_active(now);
        }
        self.stats.full_states += 1;
        self.push_snapshot(state, now);
    }

    /// Applies a delta on top of the newest snapshot.
    ///
    /// Deltas at or behind the current sequence are discarded. A delta that
    /// does not build on the newest snapshot is a gap: the first one asks
    /// for a full state and later ones are dropped until it arrives.
    pub fn apply_delta(&mut self, delta: DeltaState, now: u64) -> Option<Message> {
        let Some(current) = self.history.back() else {
            debug!("Delta {} before any full state", delta.delta_sequence);
            return self.request_sync();
        };
        let current_sequence = current.sequence();

        if is_at_or_before(delta.delta_sequence, current_sequence) {
            self.stats.deltas_discarded += 1;
            debug!(
                "Discarding delta {} -> {}, already at {}",
                delta.base_sequence, delta.delta_sequence, current_sequence
            );
            return None;
        }
        if delta.base_sequence != current_sequence {
            self.stats.deltas_discarded += 1;
            if !self.awaiting_sync {
                self.stats.gaps_detected += 1;
                warn!(
                    "Sequence gap: at {}, delta builds on {}",
                    current_sequence, delta.base_sequence
                );
            }
            return self.request_sync();
        }

        match apply_delta(current, &delta) {
            Ok(next) if next.checksum() == delta.checksum => {
                self.stats.deltas_applied += 1;
                self.push_snapshot(next, now);
                None
            }
            Ok(next) => {
                warn!(
                    "Checksum mismatch at sequence {}: {:x} != {:x}",
                    next.sequence(),
                    next.checksum(),
                    delta.checksum
                );
                self.request_sync()
            }
            Err(e) => {
                warn!("Cannot apply delta {}: {}", delta.delta_sequence, e);
                self.request_sync()
            }
        }
    }

    /// Issues at most one `request-state-sync` until a full state arrives.
    fn request_sync(&mut self) -> Option<Message> {
        if self.awaiting_sync {
            return None;
        }
        self.awaiting_sync = true;
        self.stats.resyncs_requested += 1;
        Some(Message::RequestStateSync(RequestStateSync {
            player_id: self.player_id.clone(),
            last_sequence: self.sequence().unwrap_or(0),
        }))
    }

    fn push_snapshot(&mut self, state: AuthoritativeState, now: u64) {
        if self.history.len() == SNAPSHOT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(state.clone());
        self.prediction.update_from_server(state, now);
        self.resolve_validations(now);
    }

    fn on_acknowledgment(&mut self, ack: &InputAcknowledgment, now: u64) {
        if ack.player_id != self.player_id {
            return;
        }
        trace!(
            "Input {} acknowledged after {}ms",
            ack.acknowledged_sequence,
            ack.processing_time
        );
        self.prediction
            .acknowledge(ack.acknowledged_sequence, ack.state_sequence);

        let already_pending = self
            .pending_validations
            .iter()
            .any(|pending| pending.input_sequence == ack.acknowledged_sequence);
        if already_pending {
            return;
        }
        if let Some(prediction) = self
            .prediction
            .prediction_for_sequence(ack.acknowledged_sequence)
        {
            self.pending_validations.push(PendingValidation {
                prediction_id: prediction.id.clone(),
                input_type: prediction.input_type,
                input_sequence: prediction.sequence,
                state_sequence: ack.state_sequence,
            });
        }
        self.resolve_validations(now);
    }

    fn on_rejected(&mut self, rejected: &InputRejected) {
        if rejected.player_id != self.player_id {
            return;
        }
        self.stats.inputs_rejected += 1;
        self.pending_validations
            .retain(|pending| pending.input_sequence != rejected.sequence);
        debug!("Input {} rejected: {}", rejected.sequence, rejected.reason);
        self.prediction.reject(rejected.sequence);
    }

    /// Validates every acknowledged prediction whose snapshot has arrived.
    /// The exact snapshot is used while it is retained, the newest otherwise.
    fn resolve_validations(&mut self, now: u64) {
        let Some(latest) = self.sequence() else {
            return;
        };
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_validations)
            .into_iter()
            .partition(|pending| is_at_or_before(pending.state_sequence, latest));
        self.pending_validations = waiting;

        for pending in ready {
            let snapshot = self
                .snapshot_at(pending.state_sequence)
                .or_else(|| self.latest_state());
            let Some(confirmed) =
                snapshot.and_then(|state| confirmed_outcome(state, &self.player_id, &pending))
            else {
                debug!("No confirmed outcome for input {}", pending.input_sequence);
                continue;
            };

            match self
                .prediction
                .validate_prediction(&pending.prediction_id, confirmed.payload.clone())
            {
                Ok(outcome) if outcome.is_corrected() => {
                    self.correct_prediction(&outcome, confirmed, pending.state_sequence, now);
                }
                Ok(_) => {}
                Err(e) => trace!("Skipping validation: {}", e),
            }
        }
    }

    /// Opens a reconciliation for a prediction the server contradicted and
    /// eases the entity onto the authoritative value.
    fn correct_prediction(
        &mut self,
        outcome: &PredictionOutcome,
        confirmed: ConfirmedOutcome,
        sequence: u32,
        now: u64,
    ) {
        let old_value = match &outcome.prediction.payload {
            PredictionPayload::Position(position) => Some(CorrectionValue::Position(*position)),
            PredictionPayload::Value(value) => serde_json::from_value::<PlayerStatus>(value.clone())
                .ok()
                .map(CorrectionValue::PlayerStatus),
        };
        let mut entry = CorrectionEntry {
            entity_id: confirmed.entity_id,
            correction_type: confirmed.correction_type,
            old_value,
            new_value: confirmed.value,
            smoothing_duration: MIN_SMOOTHING_MS,
        };
        entry.smoothing_duration =
            SmoothingConfig::for_corrections(std::slice::from_ref(&entry)).duration;

        if self.reconciliation.has_active_for(sequence) {
            return;
        }
        let candidates = self.prediction.unacknowledged_inputs();
        let reconciliation = self
            .reconciliation
            .reconcile(sequence, vec![entry.clone()], candidates, now);
        let id = reconciliation.id.clone();
        let smoothing = reconciliation.smoothing;
        let replay = reconciliation.requires_replay();

        if let (PredictionPayload::Position(start), Some(target)) =
            (&outcome.prediction.payload, entry.new_value.position())
        {
            self.prediction.start_interpolation(
                &entry.entity_id,
                *start,
                target,
                smoothing.duration,
                smoothing.easing,
                now,
            );
        }
        if replay {
            self.prediction.rebuild_predicted();
        }
        self.reconciliation.mark_replayed(&id);
    }

    /// Handles a server-issued rollback. A target older than the retained
    /// history cannot be replayed and forces a full resync.
    fn on_correction(&mut self, correction: RollbackCorrection, now: u64) -> Option<Message> {
        if let Err(e) = correction.validate() {
            warn!("Discarding correction {}: {}", correction.correction_id, e);
            return None;
        }
        self.stats.corrections_received += 1;

        let target = correction.rollback_to_sequence;
        let known = match self.sequence() {
            Some(latest) => {
                self.snapshot_at(target).is_some() || !is_at_or_before(target, latest)
            }
            None => false,
        };
        if !known {
            warn!(
                "Correction {} rolls back to unknown sequence {}",
                correction.correction_id, target
            );
            return self.request_sync();
        }

        // The correction settles predictions of the same input.
        let (settled, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_validations)
            .into_iter()
            .partition(|pending| pending.state_sequence == correction.current_sequence);
        self.pending_validations = waiting;
        for pending in settled {
            if let Some(actual) = correction
                .corrections
                .iter()
                .find_map(|entry| correction_payload(&entry.new_value))
            {
                if let Err(e) = self.prediction.validate_prediction(&pending.prediction_id, actual) {
                    trace!("Skipping validation: {}", e);
                }
            }
        }

        for entry in &correction.corrections {
            let Some(target) = entry.new_value.position() else {
                continue;
            };
            let start = entry
                .old_value
                .as_ref()
                .and_then(CorrectionValue::position)
                .or_else(|| self.prediction.render_position(&entry.entity_id, now));
            if let Some(start) = start {
                self.prediction.start_interpolation(
                    &entry.entity_id,
                    start,
                    target,
                    entry.smoothing_duration,
                    shared::Easing::EaseOut,
                    now,
                );
            }
        }

        if self.reconciliation.has_active_for(correction.current_sequence) {
            debug!(
                "Correction {} already reconciled locally",
                correction.correction_id
            );
            return None;
        }
        let reconciliation = self.reconciliation.from_correction(&correction, now);
        let id = reconciliation.id.clone();
        if reconciliation.requires_replay() {
            self.prediction.rebuild_predicted();
        }
        self.reconciliation.mark_replayed(&id);
        None
    }

    /// Advances interpolations and retires settled reconciliations.
    /// Returns the entities currently being eased and their positions.
    pub fn update(&mut self, now: u64) -> Vec<(String, Position)> {
        self.reconciliation.update(now);
        self.prediction.update_interpolations(now)
    }
}

fn correction_payload(value: &CorrectionValue) -> Option<PredictionPayload> {
    match value {
        CorrectionValue::Position(position) => Some(PredictionPayload::Position(*position)),
        CorrectionValue::PlayerStatus(status) => Some(status_payload(*status)),
        _ => None,
    }
}

/// What `state` says input `pending` produced: the cursor for MOVE, the
/// placed (or newest) arrow for ARROW_PLACE, the player status for ACTION.
fn confirmed_outcome(
    state: &AuthoritativeState,
    player_id: &str,
    pending: &PendingValidation,
) -> Option<ConfirmedOutcome> {
    let player = state.player(player_id)?;
    match pending.input_type {
        InputType::Move => Some(ConfirmedOutcome {
            entity_id: player_id.to_string(),
            correction_type: CorrectionType::Position,
            payload: PredictionPayload::Position(player.position),
            value: CorrectionValue::Position(player.position),
        }),
        InputType::ArrowPlace => {
            let arrow_id = format!("{}-arrow-{}", player_id, pending.input_sequence);
            let arrow = player
                .arrows
                .iter()
                .find(|arrow| arrow.id == arrow_id)
                .or_else(|| player.arrows.last())?;
            Some(ConfirmedOutcome {
                entity_id: arrow.id.clone(),
                correction_type: CorrectionType::Creation,
                payload: PredictionPayload::Position(arrow.position),
                value: CorrectionValue::Position(arrow.position),
            })
        }
        InputType::Action => Some(ConfirmedOutcome {
            entity_id: player_id.to_string(),
            correction_type: CorrectionType::State,
            payload: status_payload(player.status),
            value: CorrectionValue::PlayerStatus(player.status),
        }),
        InputType::Unknown => None,
    }
}
