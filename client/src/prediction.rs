//! Client-side predicted timeline.
//!
//! [`PredictedState`] keeps the last authoritative snapshot, the local inputs
//! the server has not yet folded into it, and one outstanding prediction per
//! input. The view rendered to the player is rebuilt by replaying the
//! unconfirmed inputs on top of the authoritative snapshot, so every server
//! update is an implicit rollback.

use crate::error::PredictionError;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    is_at_or_before, AuthoritativeState, Easing, InputType, PlayerInput, PlayerStatus, Position,
    PredictionInfo, PredictionPayload, PredictiveInput, MAX_SMOOTHING_MS, MIN_SMOOTHING_MS,
    VALIDATION_ACCURACY,
};
use std::collections::{BTreeMap, HashMap, VecDeque};

pub const INPUT_BUFFER_CAPACITY: usize = 10;
/// Unvalidated predictions older than this are discarded.
pub const PREDICTION_TTL_MS: u64 = 2000;
pub const CONFIDENCE_WINDOW_MS: u64 = 1000;
const CONFIDENCE_BUCKET_MS: u64 = 100;
pub const DIVERGENCE_CONFIDENCE: f32 = 0.7;
/// Server silence longer than this marks the timeline divergent.
pub const SERVER_STALE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    Created,
    Validated,
    Corrected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub id: String,
    pub input_type: InputType,
    pub sequence: u32,
    pub timestamp: u64,
    pub confidence: f32,
    pub payload: PredictionPayload,
    pub status: PredictionStatus,
}

/// A prediction resolved against server data.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub prediction: Prediction,
    pub actual: PredictionPayload,
    pub accuracy: f32,
}

impl PredictionOutcome {
    pub fn is_corrected(&self) -> bool {
        self.prediction.status == PredictionStatus::Corrected
    }
}

/// Eased movement of one entity from `start` to `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolation {
    pub start: Position,
    pub target: Position,
    pub start_time: u64,
    /// Milliseconds, within [16, 50].
    pub duration: f32,
    pub progress: f32,
    pub easing: Easing,
}

impl Interpolation {
    pub fn new(start: Position, target: Position, start_time: u64, duration: f32, easing: Easing) -> Self {
        Self {
            start,
            target,
            start_time,
            duration: duration.clamp(MIN_SMOOTHING_MS, MAX_SMOOTHING_MS),
            progress: 0.0,
            easing,
        }
    }

    /// Moves progress to `now` and returns the eased position.
    pub fn advance(&mut self, now: u64) -> Position {
        let elapsed = now.saturating_sub(self.start_time) as f32;
        self.progress = (elapsed / self.duration).clamp(0.0, 1.0);
        self.start.lerp(&self.target, self.easing.apply(self.progress))
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}

#[derive(Debug, Clone, Copy)]
struct ConfidenceBucket {
    start: u64,
    sum: f32,
    count: u32,
}

/// Prediction confidences of the last second, summed per 100ms bucket.
#[derive(Debug, Clone, Default)]
struct ConfidenceWindow {
    buckets: VecDeque<ConfidenceBucket>,
}

impl ConfidenceWindow {
    fn record(&mut self, now: u64, confidence: f32) {
        self.prune(now);
        let start = now - now % CONFIDENCE_BUCKET_MS;
        match self.buckets.back_mut() {
            Some(bucket) if bucket.start == start => {
                bucket.sum += confidence;
                bucket.count += 1;
            }
            _ => self.buckets.push_back(ConfidenceBucket {
                start,
                sum: confidence,
                count: 1,
            }),
        }
    }

    fn prune(&mut self, now: u64) {
        let horizon = now.saturating_sub(CONFIDENCE_WINDOW_MS);
        while let Some(front) = self.buckets.front() {
            if front.start + CONFIDENCE_BUCKET_MS <= horizon {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn mean(&self, now: u64) -> Option<f32> {
        let horizon = now.saturating_sub(CONFIDENCE_WINDOW_MS);
        let (sum, count) = self
            .buckets
            .iter()
            .filter(|bucket| bucket.start + CONFIDENCE_BUCKET_MS > horizon)
            .fold((0.0, 0), |(sum, count), bucket| {
                (sum + bucket.sum, count + bucket.count)
            });
        (count > 0).then(|| sum / count as f32)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMetrics {
    pub created: u64,
    pub validated: u64,
    pub corrected: u64,
    pub expired: u64,
    pub outstanding: usize,
    pub confidence: f32,
    #[serde(skip)]
    accuracy_sum: f64,
}

impl PredictionMetrics {
    /// Mean accuracy of every resolved prediction, 1.0 before the first.
    pub fn accuracy(&self) -> f32 {
        let resolved = self.validated + self.corrected;
        if resolved == 0 {
            1.0
        } else {
            (self.accuracy_sum / resolved as f64) as f32
        }
    }
}

#[derive(Debug, Clone)]
struct BufferedInput {
    input: PlayerInput,
    /// Authoritative sequence that contains the input, once acknowledged.
    applied_at: Option<u32>,
}

pub struct PredictedState {
    player_id: String,
    authoritative: Option<AuthoritativeState>,
    predicted: Option<AuthoritativeState>,
    last_server_update: Option<u64>,
    inputs: VecDeque<BufferedInput>,
    predictions: BTreeMap<String, Prediction>,
    interpolations: HashMap<String, Interpolation>,
    confidence: ConfidenceWindow,
    metrics: PredictionMetrics,
}

impl PredictedState {
    pub fn new(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            authoritative: None,
            predicted: None,
            last_server_update: None,
            inputs: VecDeque::with_capacity(INPUT_BUFFER_CAPACITY),
            predictions: BTreeMap::new(),
            interpolations: HashMap::new(),
            confidence: ConfidenceWindow::default(),
            metrics: PredictionMetrics::default(),
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn authoritative(&self) -> Option<&AuthoritativeState> {
        self.authoritative.as_ref()
    }

    /// Authoritative snapshot with every unconfirmed local input replayed.
    pub fn predicted(&self) -> Option<&AuthoritativeState> {
        self.predicted.as_ref()
    }

    pub fn last_server_update(&self) -> Option<u64> {
        self.last_server_update
    }

    pub fn buffered_inputs(&self) -> impl Iterator<Item = &PlayerInput> {
        self.inputs.iter().map(|buffered| &buffered.input)
    }

    /// Buffered inputs the server has not acknowledged yet, oldest first.
    pub fn unacknowledged_inputs(&self) -> Vec<PlayerInput> {
        self.inputs
            .iter()
            .filter(|buffered| buffered.applied_at.is_none())
            .map(|buffered| buffered.input.clone())
            .collect()
    }

    pub fn predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.values()
    }

    pub fn prediction_for_sequence(&self, sequence: u32) -> Option<&Prediction> {
        self.predictions
            .values()
            .find(|prediction| prediction.sequence == sequence)
    }

    pub fn metrics(&self) -> &PredictionMetrics {
        &self.metrics
    }

    /// Buffers a local input and immediately predicts its outcome.
    ///
    /// Inputs must arrive in timestamp order; a full buffer evicts its
    /// oldest entry. The returned message is ready to send to the server.
    pub fn add_input(
        &mut self,
        input: PlayerInput,
        now: u64,
    ) -> Result<PredictiveInput, PredictionError> {
        input.validate_data()?;
        if let Some(newest) = self.inputs.back() {
            if input.timestamp < newest.input.timestamp {
                return Err(PredictionError::OutOfOrder {
                    sequence: input.sequence,
                    timestamp: input.timestamp,
                    newest: newest.input.timestamp,
                });
            }
        }

        if self.inputs.len() == INPUT_BUFFER_CAPACITY {
            if let Some(evicted) = self.inputs.pop_front() {
                trace!("Input buffer full, evicted input {}", evicted.input.sequence);
            }
        }

        let prediction = Prediction {
            id: format!("{}-{}", self.player_id, input.sequence),
            input_type: input.input_type,
            sequence: input.sequence,
            timestamp: now,
            confidence: input.input_type.base_confidence(),
            payload: expected_outcome(&input),
            status: PredictionStatus::Created,
        };
        self.confidence.record(now, prediction.confidence);
        self.metrics.created += 1;

        if let Some(predicted) = self.predicted.as_mut() {
            apply_local(predicted, &self.player_id, &input, now);
        }
        self.inputs.push_back(BufferedInput {
            input: input.clone(),
            applied_at: None,
        });

        let info = PredictionInfo {
            prediction_id: prediction.id.clone(),
            expected_outcome: prediction.payload.clone(),
            confidence: prediction.confidence,
        };
        self.predictions.insert(prediction.id.clone(), prediction);

        Ok(PredictiveInput {
            player_id: self.player_id.clone(),
            input,
            prediction: info,
        })
    }

    /// Records that the server applied input `sequence` in snapshot
    /// `state_sequence`. The input stays buffered until that snapshot
    /// arrives so the predicted view never snaps back.
    pub fn acknowledge(&mut self, sequence: u32, state_sequence: u32) {
        for buffered in self.inputs.iter_mut() {
            if buffered.applied_at.is_none() && is_at_or_before(buffered.input.sequence, sequence) {
                buffered.applied_at = Some(state_sequence);
            }
        }
        self.prune_applied_inputs();
    }

    /// Drops a rejected input and its prediction. Returns the prediction.
    pub fn reject(&mut self, sequence: u32) -> Option<Prediction> {
        self.inputs.retain(|buffered| buffered.input.sequence != sequence);
        let id = self.prediction_for_sequence(sequence)?.id.clone();
        let mut prediction = self.predictions.remove(&id)?;
        prediction.status = PredictionStatus::Corrected;
        self.metrics.corrected += 1;
        self.rebuild_predicted();
        Some(prediction)
    }

    /// Replaces the authoritative reference, expires stale predictions and
    /// rebuilds the predicted view.
    pub fn update_from_server(&mut self, state: AuthoritativeState, now: u64) {
        trace!("Authoritative state now at sequence {}", state.sequence());
        self.authoritative = Some(state);
        self.last_server_update = Some(now);

        self.expire_predictions(now);
        self.prune_applied_inputs();
        self.rebuild_predicted();
        self.metrics.confidence = self.confidence(now);
    }

    /// Drops predictions older than [`PREDICTION_TTL_MS`]. Returns how many
    /// expired.
    pub fn expire_predictions(&mut self, now: u64) -> usize {
        let before = self.predictions.len();
        self.predictions
            .retain(|_, prediction| now.saturating_sub(prediction.timestamp) <= PREDICTION_TTL_MS);
        let expired = before - self.predictions.len();
        if expired > 0 {
            debug!("{} predictions expired without validation", expired);
            self.metrics.expired += expired as u64;
        }
        self.metrics.outstanding = self.predictions.len();
        expired
    }

    /// Scores a prediction against the server-confirmed outcome and retires
    /// it as VALIDATED or CORRECTED.
    pub fn validate_prediction(
        &mut self,
        prediction_id: &str,
        actual: PredictionPayload,
    ) -> Result<PredictionOutcome, PredictionError> {
        let mut prediction = self
            .predictions
            .remove(prediction_id)
            .ok_or_else(|| PredictionError::UnknownPrediction(prediction_id.to_string()))?;

        let accuracy = prediction.payload.accuracy_against(&actual);
        if accuracy >= VALIDATION_ACCURACY {
            prediction.status = PredictionStatus::Validated;
            self.metrics.validated += 1;
        } else {
            prediction.status = PredictionStatus::Corrected;
            self.metrics.corrected += 1;
            debug!(
                "Prediction {} corrected with accuracy {:.2}",
                prediction.id, accuracy
            );
        }
        self.metrics.accuracy_sum += accuracy as f64;
        self.metrics.outstanding = self.predictions.len();

        Ok(PredictionOutcome {
            prediction,
            actual,
            accuracy,
        })
    }

    /// Mean confidence of the predictions issued in the last second, 1.0
    /// when there were none.
    pub fn confidence(&self, now: u64) -> f32 {
        self.confidence.mean(now).unwrap_or(1.0)
    }

    pub fn is_divergent(&self, now: u64) -> bool {
        match self.last_server_update {
            None => true,
            Some(last) => {
                now.saturating_sub(last) > SERVER_STALE_MS
                    || self.confidence(now) < DIVERGENCE_CONFIDENCE
            }
        }
    }

    pub fn start_interpolation(
        &mut self,
        entity_id: &str,
        start: Position,
        target: Position,
        duration: f32,
        easing: Easing,
        now: u64,
    ) {
        self.interpolations.insert(
            entity_id.to_string(),
            Interpolation::new(start, target, now, duration, easing),
        );
    }

    pub fn interpolation(&self, entity_id: &str) -> Option<&Interpolation> {
        self.interpolations.get(entity_id)
    }

    /// Advances every interpolation and returns the current positions.
    /// Finished interpolations report their target once, then are dropped.
    /// Advances running interpolations and expires stale predictions, so a
    /// silent server cannot keep them outstanding.
    pub fn update_interpolations(&mut self, now: u64) -> Vec<(String, Position)> {
        self.expire_predictions(now);
        let positions = self
            .interpolations
            .iter_mut()
            .map(|(id, interpolation)| (id.clone(), interpolation.advance(now)))
            .collect();
        self.interpolations
            .retain(|_, interpolation| !interpolation.is_complete());
        positions
    }

    /// Where `entity_id` should be drawn: mid-correction position if one is
    /// running, else the predicted view.
    pub fn render_position(&self, entity_id: &str, now: u64) -> Option<Position> {
        if let Some(interpolation) = self.interpolations.get(entity_id) {
            let mut interpolation = *interpolation;
            return Some(interpolation.advance(now));
        }
        let predicted = self.predicted.as_ref()?;
        predicted
            .player(entity_id)
            .map(|player| player.position)
            .or_else(|| predicted.entity(entity_id).map(|entity| entity.position))
    }

    fn prune_applied_inputs(&mut self) {
        let Some(sequence) = self.authoritative.as_ref().map(AuthoritativeState::sequence) else {
            return;
        };
        self.inputs.retain(|buffered| match buffered.applied_at {
            Some(applied_at) => !is_at_or_before(applied_at, sequence),
            None => true,
        });
    }

    /// Rolls the predicted view back to the authoritative snapshot and
    /// replays the buffered inputs in order.
    pub fn rebuild_predicted(&mut self) {
        let Some(authoritative) = &self.authoritative else {
            self.predicted = None;
            return;
        };
        let mut predicted = authoritative.clone();
        let now = predicted.timestamp();
        for buffered in &self.inputs {
            apply_local(&mut predicted, &self.player_id, &buffered.input, now);
        }
        self.predicted = Some(predicted);
    }
}

/// What the client expects the server to make of `input`.
pub fn expected_outcome(input: &PlayerInput) -> PredictionPayload {
    match input.input_type {
        InputType::ArrowPlace | InputType::Move => {
            PredictionPayload::Position(input.data.position.unwrap_or_default())
        }
        InputType::Action | InputType::Unknown => match action_status(input) {
            Some(status) => status_payload(status),
            None => PredictionPayload::Value(
                input
                    .data
                    .action
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
        },
    }
}

pub fn status_payload(status: PlayerStatus) -> PredictionPayload {
    PredictionPayload::Value(serde_json::to_value(status).unwrap_or(Value::Null))
}

fn action_status(input: &PlayerInput) -> Option<PlayerStatus> {
    match input.data.action.as_deref()? {
        "ready" => Some(PlayerStatus::Active),
        "away" => Some(PlayerStatus::Disconnected),
        _ => None,
    }
}

/// Applies `input` to the local view the way the server would. Anything the
/// server would reject is skipped.
fn apply_local(state: &mut AuthoritativeState, player_id: &str, input: &PlayerInput, now: u64) {
    let result = match (input.input_type, input.data.position, input.data.direction) {
        (InputType::Move, Some(position), _) => state.move_cursor(player_id, position, now),
        (InputType::ArrowPlace, Some(position), Some(direction)) => {
            let arrow_id = format!("{}-arrow-{}", player_id, input.sequence);
            state
                .place_arrow(player_id, &arrow_id, position, direction, now)
                .map(|_| ())
        }
        (InputType::Action, _, _) => match action_status(input) {
            Some(status) => state.set_player_status(player_id, status, now),
            None => Ok(()),
        },
        _ => Ok(()),
    };
    if let Err(e) = result {
        trace!("Input {} not predicted locally: {}", input.sequence, e);
    }
}
