//! Rollback reconciliation.
//!
//! A [`Reconciliation`] is opened for every divergence between the predicted
//! and the authoritative timeline: a corrected prediction or a
//! `rollback-correction` from the server. Severity, smoothing and the need
//! for input replay are derived from the correction set alone.

use log::{debug, info, warn};
use shared::correction::{classify_severity, requires_input_replay};
use shared::{CorrectionEntry, PlayerInput, RollbackCorrection, Severity, SmoothingConfig};
use std::collections::{BTreeMap, VecDeque};

pub const HISTORY_CAPACITY: usize = 100;
/// Reconciliations still active after this long are retired as timed out.
pub const RECONCILIATION_TIMEOUT_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct InputReplay {
    pub start_sequence: u32,
    /// Timestamp order, original timestamps preserved.
    pub inputs: Vec<PlayerInput>,
    pub completed: bool,
}

impl InputReplay {
    fn new(fallback_sequence: u32, mut inputs: Vec<PlayerInput>) -> Self {
        inputs.sort_by_key(|input| (input.timestamp, input.sequence));
        Self {
            start_sequence: inputs
                .first()
                .map(|input| input.sequence)
                .unwrap_or(fallback_sequence),
            completed: inputs.is_empty(),
            inputs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStatus {
    Active,
    Completed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub id: String,
    pub game_state_sequence: u32,
    pub severity: Severity,
    pub corrections: Vec<CorrectionEntry>,
    pub smoothing: SmoothingConfig,
    pub replay: InputReplay,
    pub status: ReconciliationStatus,
    pub created_at: u64,
    pub finished_at: Option<u64>,
}

impl Reconciliation {
    pub fn requires_replay(&self) -> bool {
        !self.replay.inputs.is_empty()
    }

    /// Smoothing has run its course and any replay is done.
    pub fn is_settled(&self, now: u64) -> bool {
        self.replay.completed
            && now.saturating_sub(self.created_at) as f32 >= self.smoothing.duration
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationStats {
    pub total: u32,
    pub minor: u32,
    pub moderate: u32,
    pub major: u32,
    pub replays: u32,
    pub timed_out: u32,
}

#[derive(Debug, Default)]
pub struct ReconciliationManager {
    active: BTreeMap<String, Reconciliation>,
    history: VecDeque<Reconciliation>,
    next_id: u64,
    stats: ReconciliationStats,
}

impl ReconciliationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a reconciliation for `corrections` observed at authoritative
    /// sequence `sequence`. `candidates` are the local inputs to replay if
    /// the correction set requires it.
    pub fn reconcile(
        &mut self,
        sequence: u32,
        corrections: Vec<CorrectionEntry>,
        candidates: Vec<PlayerInput>,
        now: u64,
    ) -> &Reconciliation {
        let replay = if requires_input_replay(&corrections) {
            InputReplay::new(sequence, candidates)
        } else {
            InputReplay::new(sequence, Vec::new())
        };
        self.open(sequence, corrections, replay, now)
    }

    /// Opens a reconciliation for a server-issued correction, replaying the
    /// inputs it carries from `rollbackToSequence`.
    pub fn from_correction(&mut self, correction: &RollbackCorrection, now: u64) -> &Reconciliation {
        let replay = InputReplay::new(
            correction.rollback_to_sequence,
            correction.replay_inputs.clone(),
        );
        self.open(
            correction.current_sequence,
            correction.corrections.clone(),
            replay,
            now,
        )
    }

    fn open(
        &mut self,
        sequence: u32,
        corrections: Vec<CorrectionEntry>,
        replay: InputReplay,
        now: u64,
    ) -> &Reconciliation {
        let severity = classify_severity(&corrections);
        let smoothing = SmoothingConfig::for_corrections(&corrections);

        self.next_id += 1;
        let id = format!("recon-{}", self.next_id);
        self.stats.total += 1;
        match severity {
            Severity::Minor => self.stats.minor += 1,
            Severity::Moderate => self.stats.moderate += 1,
            Severity::Major => self.stats.major += 1,
        }
        if !replay.completed {
            self.stats.replays += 1;
        }
        debug!(
            "Reconciliation {} at sequence {}: {:?}, {} corrections, {:.0}ms {:?}",
            id,
            sequence,
            severity,
            corrections.len(),
            smoothing.duration,
            smoothing.easing
        );

        let reconciliation = Reconciliation {
            id: id.clone(),
            game_state_sequence: sequence,
            severity,
            corrections,
            smoothing,
            replay,
            status: ReconciliationStatus::Active,
            created_at: now,
            finished_at: None,
        };
        self.active.entry(id).or_insert(reconciliation)
    }

    pub fn get(&self, id: &str) -> Option<&Reconciliation> {
        self.active.get(id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Reconciliation> {
        self.active.values()
    }

    pub fn has_active_for(&self, sequence: u32) -> bool {
        self.active
            .values()
            .any(|reconciliation| reconciliation.game_state_sequence == sequence)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &Reconciliation> {
        self.history.iter()
    }

    pub fn stats(&self) -> ReconciliationStats {
        self.stats
    }

    /// Marks the replay of `id` as executed. Returns false for unknown ids.
    pub fn mark_replayed(&mut self, id: &str) -> bool {
        match self.active.get_mut(id) {
            Some(reconciliation) => {
                reconciliation.replay.completed = true;
                true
            }
            None => false,
        }
    }

    pub fn complete(&mut self, id: &str, now: u64) -> bool {
        self.retire(id, ReconciliationStatus::Completed, now)
    }

    /// Completes settled reconciliations and times out stale ones.
    /// Returns how many were retired.
    pub fn update(&mut self, now: u64) -> usize {
        let mut finished = Vec::new();
        for reconciliation in self.active.values() {
            if now.saturating_sub(reconciliation.created_at) >= RECONCILIATION_TIMEOUT_MS {
                finished.push((reconciliation.id.clone(), ReconciliationStatus::TimedOut));
            } else if reconciliation.is_settled(now) {
                finished.push((reconciliation.id.clone(), ReconciliationStatus::Completed));
            }
        }

        let count = finished.len();
        for (id, status) in finished {
            if status == ReconciliationStatus::TimedOut {
                warn!("Reconciliation {} timed out", id);
            }
            self.retire(&id, status, now);
        }
        count
    }

    fn retire(&mut self, id: &str, status: ReconciliationStatus, now: u64) -> bool {
        let Some(mut reconciliation) = self.active.remove(id) else {
            return false;
        };
        reconciliation.status = status;
        reconciliation.finished_at = Some(now);
        if status == ReconciliationStatus::TimedOut {
            self.stats.timed_out += 1;
        }

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(reconciliation);
        true
    }

    /// Drops every active reconciliation, e.g. after a full resync.
    pub fn clear_active(&mut self, now: u64) {
        let ids: Vec<String> = self.active.keys().cloned().collect();
        if !ids.is_empty() {
            info!("Completing {} reconciliations after resync", ids.len());
        }
        for id in ids {
            self.retire(&id, ReconciliationStatus::Completed, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{
        CorrectionPriority, CorrectionType, CorrectionValue, Easing, PlayerStatus, Position,
    };

    fn position_correction(to: Position) -> CorrectionEntry {
        CorrectionEntry {
            entity_id: "e1".to_string(),
            correction_type: CorrectionType::Position,
            old_value: Some(CorrectionValue::Position(Position::new(0.0, 0.0))),
            new_value: CorrectionValue::Position(to),
            smoothing_duration: 16.0,
        }
    }

    fn inputs() -> Vec<PlayerInput> {
        vec![
            PlayerInput::movement(1020, 3, Position::new(3.0, 3.0)),
            PlayerInput::movement(1000, 1, Position::new(1.0, 1.0)),
            PlayerInput::movement(1010, 2, Position::new(2.0, 2.0)),
        ]
    }

    #[test]
    fn test_minor_correction_skips_replay() {
        let mut manager = ReconciliationManager::new();
        let reconciliation = manager.reconcile(
            10,
            vec![position_correction(Position::new(0.5, 0.5))],
            inputs(),
            1000,
        );
        assert_eq!(reconciliation.severity, Severity::Minor);
        assert_eq!(reconciliation.smoothing.easing, Easing::Linear);
        assert!(!reconciliation.requires_replay());
        assert!(reconciliation.replay.completed);
    }

    #[test]
    fn test_major_correction_replays_in_order() {
        let mut manager = ReconciliationManager::new();
        let reconciliation = manager.reconcile(
            10,
            vec![position_correction(Position::new(8.0, 8.0))],
            inputs(),
            1000,
        );
        assert_eq!(reconciliation.severity, Severity::Major);
        assert_approx_eq!(reconciliation.smoothing.duration, 50.0);

        let replay = &reconciliation.replay;
        assert!(!replay.completed);
        assert_eq!(replay.start_sequence, 1);
        let timestamps: Vec<u64> = replay.inputs.iter().map(|input| input.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 1010, 1020]);
        assert_eq!(manager.stats().replays, 1);
    }

    #[test]
    fn test_state_correction_is_moderate() {
        let mut manager = ReconciliationManager::new();
        let entry = CorrectionEntry {
            entity_id: "p1".to_string(),
            correction_type: CorrectionType::State,
            old_value: None,
            new_value: CorrectionValue::PlayerStatus(PlayerStatus::Active),
            smoothing_duration: 33.0,
        };
        let reconciliation = manager.reconcile(4, vec![entry], Vec::new(), 0);
        assert_eq!(reconciliation.severity, Severity::Moderate);
    }

    #[test]
    fn test_from_correction_uses_server_inputs() {
        let mut manager = ReconciliationManager::new();
        let correction = RollbackCorrection {
            correction_id: "c1".to_string(),
            affected_entities: vec!["e1".to_string()],
            rollback_to_sequence: 7,
            current_sequence: 9,
            corrections: vec![position_correction(Position::new(0.5, 0.0))],
            replay_inputs: inputs(),
            priority: CorrectionPriority::Low,
        };
        let reconciliation = manager.from_correction(&correction, 500);
        assert_eq!(reconciliation.game_state_sequence, 9);
        assert_eq!(reconciliation.replay.inputs.len(), 3);
        assert_eq!(reconciliation.replay.start_sequence, 1);
        assert_eq!(manager.stats().replays, 1);
    }

    #[test]
    fn test_settled_reconciliations_move_to_history() {
        let mut manager = ReconciliationManager::new();
        let id = manager
            .reconcile(1, vec![position_correction(Position::new(8.0, 8.0))], inputs(), 1000)
            .id
            .clone();

        // Replay still pending.
        assert_eq!(manager.update(1100), 0);
        assert!(manager.mark_replayed(&id));
        assert_eq!(manager.update(1100), 1);
        assert_eq!(manager.active_count(), 0);

        let finished = manager.history().next().unwrap();
        assert_eq!(finished.status, ReconciliationStatus::Completed);
        assert_eq!(finished.finished_at, Some(1100));
    }

    #[test]
    fn test_stale_reconciliation_times_out() {
        let mut manager = ReconciliationManager::new();
        manager.reconcile(1, vec![position_correction(Position::new(8.0, 8.0))], inputs(), 0);
        assert_eq!(manager.update(RECONCILIATION_TIMEOUT_MS - 1), 0);
        assert_eq!(manager.update(RECONCILIATION_TIMEOUT_MS), 1);
        assert_eq!(manager.stats().timed_out, 1);
        assert_eq!(
            manager.history().next().unwrap().status,
            ReconciliationStatus::TimedOut
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager = ReconciliationManager::new();
        for i in 0..(HISTORY_CAPACITY as u32 + 20) {
            let id = manager
                .reconcile(i, vec![position_correction(Position::new(0.2, 0.0))], Vec::new(), 0)
                .id
                .clone();
            assert!(manager.complete(&id, 1));
        }
        assert_eq!(manager.history().count(), HISTORY_CAPACITY);
        assert_eq!(manager.history().next().unwrap().game_state_sequence, 20);
        assert_eq!(manager.stats().total, HISTORY_CAPACITY as u32 + 20);
    }
}
