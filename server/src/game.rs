//! One authoritative game instance: the state, its snapshot chain and the
//! round lifecycle.
//!
//! Every accepted mutation is followed by a snapshot, so the history holds
//! consecutive sequences and any broadcast can be expressed as a chain of
//! single-step deltas from the last broadcast sequence.

use crate::config::GameConfig;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use shared::correction::{classify_severity, requires_input_replay};
use shared::{
    compute_delta, next_sequence, AuthoritativeState, BoardBounds, CorrectionEntry,
    CorrectionPriority, CorrectionType, CorrectionValue, DeltaState, Direction, Entity,
    EntityKind, EntityStatus, GamePhase, InputType, Player, PlayerInput, PlayerStatus, Position,
    PredictionPayload, PredictiveInput, RollbackCorrection, Severity, SmoothingConfig, StateError,
    Velocity, VALIDATION_ACCURACY,
};
use std::collections::VecDeque;

/// Mice within this distance (px) of a goal are captured.
const GOAL_RADIUS: f32 = 20.0;
/// Mice within this distance (px) of an arrow take its direction.
const ARROW_RADIUS: f32 = 10.0;
/// Seeded entities keep this distance (px) from the board edges.
const SPAWN_MARGIN: f32 = 40.0;

/// What applying one input did to the authoritative state.
#[derive(Debug, Clone, PartialEq)]
pub struct InputOutcome {
    pub base_sequence: u32,
    pub state_sequence: u32,
    /// Entity or player the input changed.
    pub entity_id: String,
    pub correction_type: CorrectionType,
    /// Outcome in the same shape as a client's expected outcome.
    pub actual: PredictionPayload,
    pub authoritative: CorrectionValue,
}

/// Updates owed to clients since the last broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    UpToDate,
    Deltas(Vec<DeltaState>),
    /// The chain fell out of the snapshot history.
    Full(AuthoritativeState),
}

pub struct GameInstance {
    state: AuthoritativeState,
    history: VecDeque<AuthoritativeState>,
    last_broadcast: u32,
    config: GameConfig,
    rng: StdRng,
    round: u64,
}

impl GameInstance {
    pub fn new(config: GameConfig, now: u64) -> Self {
        Self::with_rng(config, now, StdRng::from_entropy())
    }

    /// Deterministic entity seeding, for tests and replays.
    pub fn with_seed(config: GameConfig, now: u64, seed: u64) -> Self {
        Self::with_rng(config, now, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, now: u64, rng: StdRng) -> Self {
        let state = AuthoritativeState::new(BoardBounds::default(), now);
        let mut history = VecDeque::with_capacity(config.snapshot_history);
        history.push_back(state.clone());
        Self {
            last_broadcast: state.sequence(),
            state,
            history,
            config,
            rng,
            round: 0,
        }
    }

    pub fn state(&self) -> &AuthoritativeState {
        &self.state
    }

    pub fn sequence(&self) -> u32 {
        self.state.sequence()
    }

    pub fn phase(&self) -> GamePhase {
        self.state.phase()
    }

    pub fn player_count(&self) -> usize {
        self.state.players().len()
    }

    pub fn snapshot_at(&self, sequence: u32) -> Option<&AuthoritativeState> {
        self.history.iter().find(|state| state.sequence() == sequence)
    }

    fn record_snapshot(&mut self) {
        if self.history.len() >= self.config.snapshot_history {
            self.history.pop_front();
        }
        self.history.push_back(self.state.clone());
    }

    /// Adds a player with their cursor at the board center.
    pub fn add_player(&mut self, id: &str, name: &str, color: &str, now: u64) -> Result<(), StateError> {
        let bounds = *self.state.bounds();
        let center = Position::new(bounds.width / 2.0, bounds.height / 2.0);
        self.state.add_player(Player::new(id, name, color, center), now)?;
        self.record_snapshot();
        info!("Added player {} ({})", id, name);
        Ok(())
    }

    /// Removes a player, their arrows and their goal.
    pub fn remove_player(&mut self, id: &str, now: u64) -> Result<Player, StateError> {
        let player = self.state.remove_player(id, now)?;
        self.record_snapshot();

        let goal_id = goal_id(id);
        if self.state.entity(&goal_id).is_some() {
            self.state.remove_entity(&goal_id, now)?;
            self.record_snapshot();
        }
        info!("Removed player {}", id);
        Ok(player)
    }

    /// Applies one validated input as a single mutation.
    pub fn apply_input(
        &mut self,
        player_id: &str,
        input: &PlayerInput,
        now: u64,
    ) -> Result<InputOutcome, StateError> {
        let base_sequence = self.state.sequence();
        let missing = |field: &'static str| StateError::InvalidField {
            field,
            reason: "missing from input".to_string(),
        };

        let (entity_id, correction_type, actual, authoritative) = match input.input_type {
            InputType::ArrowPlace => {
                let position = input.data.position.ok_or_else(|| missing("arrow position"))?;
                let direction = input.data.direction.ok_or_else(|| missing("arrow direction"))?;
                let arrow_id = format!("{}-arrow-{}", player_id, input.sequence);
                if let Some(evicted) =
                    self.state
                        .place_arrow(player_id, &arrow_id, position, direction, now)?
                {
                    debug!("Arrow {} evicted by {}", evicted, arrow_id);
                }
                (
                    arrow_id,
                    CorrectionType::Creation,
                    PredictionPayload::Position(position),
                    CorrectionValue::Position(position),
                )
            }
            InputType::Move => {
                let position = input.data.position.ok_or_else(|| missing("cursor position"))?;
                self.state.move_cursor(player_id, position, now)?;
                (
                    player_id.to_string(),
                    CorrectionType::Position,
                    PredictionPayload::Position(position),
                    CorrectionValue::Position(position),
                )
            }
            InputType::Action => {
                let status = match input.data.action.as_deref() {
                    Some("ready") => PlayerStatus::Active,
                    Some("away") => PlayerStatus::Disconnected,
                    other => {
                        return Err(StateError::InvalidField {
                            field: "action",
                            reason: format!("unsupported action {:?}", other.unwrap_or_default()),
                        })
                    }
                };
                self.state.set_player_status(player_id, status, now)?;
                (
                    player_id.to_string(),
                    CorrectionType::State,
                    PredictionPayload::Value(
                        serde_json::to_value(status).unwrap_or(Value::Null),
                    ),
                    CorrectionValue::PlayerStatus(status),
                )
            }
            InputType::Unknown => {
                return Err(StateError::InvalidField {
                    field: "input type",
                    reason: "unknown input type".to_string(),
                })
            }
        };
        self.record_snapshot();

        Ok(InputOutcome {
            base_sequence,
            state_sequence: self.state.sequence(),
            entity_id,
            correction_type,
            actual,
            authoritative,
        })
    }

    /// Runs the round lifecycle and rules, then advances the simulation by
    /// `delta_time` seconds. Returns the phase if it changed.
    pub fn tick(&mut self, delta_time: f32, now: u64) -> Option<GamePhase> {
        let before = self.state.phase();

        match before {
            GamePhase::Waiting => {
                if self.state.players().len() >= self.config.min_players {
                    self.start_round(now);
                }
            }
            GamePhase::Active => {
                self.apply_rules(delta_time, now);
                let elapsed = now.saturating_sub(self.state.started_at().unwrap_or(now));
                if elapsed >= self.config.round_duration_secs * 1000
                    && self.state.apply_phase_transition(GamePhase::Ending, now)
                {
                    self.record_snapshot();
                }
            }
            GamePhase::Ending => {
                let elapsed = now.saturating_sub(self.state.ended_at().unwrap_or(now));
                if elapsed >= self.config.ending_duration_secs * 1000 {
                    self.state = self.state.next_round(now);
                    self.record_snapshot();
                }
            }
        }

        self.state.tick(delta_time, now);
        self.record_snapshot();

        let after = self.state.phase();
        if after != before {
            info!("Phase {:?} -> {:?} at sequence {}", before, after, self.state.sequence());
            Some(after)
        } else {
            None
        }
    }

    fn start_round(&mut self, now: u64) {
        if !self.state.apply_phase_transition(GamePhase::Active, now) {
            return;
        }
        self.record_snapshot();
        self.round += 1;

        let owners: Vec<String> = self.state.players().keys().cloned().collect();
        for owner in owners {
            let position = self.random_position();
            let goal = Entity::new(&goal_id(&owner), EntityKind::Goal, position).with_owner(&owner);
            self.add_seeded(goal, now);
        }

        let speed = self.config.mouse_speed;
        for i in 0..self.config.mice_per_round {
            let position = self.random_position();
            let direction = self.random_direction();
            let id = format!("mouse-{}-{}", self.round, i);
            let mouse = Entity::new(&id, EntityKind::Mouse, position)
                .with_direction(direction)
                .with_velocity(heading(direction, speed));
            self.add_seeded(mouse, now);
        }
        info!(
            "Round {} started with {} players",
            self.round,
            self.state.players().len()
        );
    }

    fn add_seeded(&mut self, entity: Entity, now: u64) {
        let id = entity.id.clone();
        match self.state.add_entity(entity, now) {
            Ok(()) => self.record_snapshot(),
            Err(e) => warn!("Failed to seed entity {}: {}", id, e),
        }
    }

    /// Minimal rules: mice follow arrows they touch, bounce off the board
    /// edge and are captured by goals.
    fn apply_rules(&mut self, delta_time: f32, now: u64) {
        let bounds = *self.state.bounds();
        let speed = self.config.mouse_speed;
        let entities = self.state.entities();
        let of_kind = move |kind: EntityKind| entities.values().filter(move |e| e.kind == kind);

        let mut redirects = Vec::new();
        let mut captures = Vec::new();
        for mouse in of_kind(EntityKind::Mouse).filter(|e| e.status == EntityStatus::Active) {
            if let Some(goal) = of_kind(EntityKind::Goal)
                .find(|goal| goal.position.distance_to(&mouse.position) <= GOAL_RADIUS)
            {
                captures.push((mouse.id.clone(), goal.owner_id.clone()));
                continue;
            }

            let mut direction = of_kind(EntityKind::Arrow)
                .find(|arrow| arrow.position.distance_to(&mouse.position) <= ARROW_RADIUS)
                .map_or(mouse.direction, |arrow| arrow.direction);
            let (ux, uy) = direction.unit();
            let next = Position::new(
                mouse.position.x + ux * speed * delta_time,
                mouse.position.y + uy * speed * delta_time,
            );
            if !bounds.contains(&next) {
                direction = direction.opposite();
            }
            if direction != mouse.direction {
                redirects.push((mouse.id.clone(), direction, heading(direction, speed)));
            }
        }

        if !redirects.is_empty() {
            match self.state.redirect_entities(&redirects, now) {
                Ok(()) => self.record_snapshot(),
                Err(e) => warn!("Failed to redirect mice: {}", e),
            }
        }
        for (mouse_id, scorer) in captures {
            match self.state.capture_entity(&mouse_id, scorer.as_deref(), now) {
                Ok(()) => {
                    self.record_snapshot();
                    debug!("{} captured, point to {:?}", mouse_id, scorer);
                }
                Err(e) => warn!("Failed to capture {}: {}", mouse_id, e),
            }
        }
    }

    /// Updates owed since the last call: one delta per sequence step while
    /// the chain is still in history, otherwise the full state.
    pub fn pending_updates(&mut self) -> StateUpdate {
        let current = self.state.sequence();
        if current == self.last_broadcast {
            return StateUpdate::UpToDate;
        }
        let start = self
            .history
            .iter()
            .position(|state| state.sequence() == self.last_broadcast);
        self.last_broadcast = current;

        let Some(start) = start else {
            return StateUpdate::Full(self.state.clone());
        };
        let chain: Vec<&AuthoritativeState> = self.history.iter().skip(start).collect();
        let consecutive = chain
            .windows(2)
            .all(|pair| pair[1].sequence() == next_sequence(pair[0].sequence()));
        if !consecutive {
            return StateUpdate::Full(self.state.clone());
        }

        StateUpdate::Deltas(
            chain
                .windows(2)
                .map(|pair| compute_delta(pair[0], pair[1]))
                .collect(),
        )
    }

    fn random_position(&mut self) -> Position {
        let bounds = *self.state.bounds();
        let margin_x = SPAWN_MARGIN.min(bounds.width / 2.0);
        let margin_y = SPAWN_MARGIN.min(bounds.height / 2.0);
        Position::new(
            self.rng.gen_range(margin_x..=bounds.width - margin_x),
            self.rng.gen_range(margin_y..=bounds.height - margin_y),
        )
    }

    fn random_direction(&mut self) -> Direction {
        match self.rng.gen_range(0..4) {
            0 => Direction::Up,
            1 => Direction::Down,
            2 => Direction::Left,
            _ => Direction::Right,
        }
    }
}

fn goal_id(player_id: &str) -> String {
    format!("goal-{}", player_id)
}

fn heading(direction: Direction, speed: f32) -> Velocity {
    let (ux, uy) = direction.unit();
    Velocity::new(ux * speed, uy * speed)
}

/// Builds the correction owed to a client whose prediction missed the
/// authoritative outcome, or `None` when the prediction holds.
pub fn correction_for(
    input: &PredictiveInput,
    outcome: &InputOutcome,
    correction_id: String,
) -> Option<RollbackCorrection> {
    let accuracy = input.prediction.expected_outcome.accuracy_against(&outcome.actual);
    if accuracy >= VALIDATION_ACCURACY {
        return None;
    }

    let old_value = match &input.prediction.expected_outcome {
        PredictionPayload::Position(position) => Some(CorrectionValue::Position(*position)),
        PredictionPayload::Value(value) => serde_json::from_value::<PlayerStatus>(value.clone())
            .ok()
            .map(CorrectionValue::PlayerStatus),
    };
    let mut entry = CorrectionEntry {
        entity_id: outcome.entity_id.clone(),
        correction_type: outcome.correction_type,
        old_value,
        new_value: outcome.authoritative.clone(),
        smoothing_duration: shared::MIN_SMOOTHING_MS,
    };
    entry.smoothing_duration = SmoothingConfig::for_corrections(std::slice::from_ref(&entry)).duration;
    let corrections = vec![entry];

    let priority = match classify_severity(&corrections) {
        Severity::Major => CorrectionPriority::High,
        Severity::Moderate => CorrectionPriority::Medium,
        Severity::Minor => CorrectionPriority::Low,
    };
    let replay_inputs = if requires_input_replay(&corrections) {
        vec![input.input.clone()]
    } else {
        Vec::new()
    };

    Some(RollbackCorrection {
        correction_id,
        affected_entities: vec![outcome.entity_id.clone()],
        rollback_to_sequence: outcome.base_sequence,
        current_sequence: outcome.state_sequence,
        corrections,
        replay_inputs,
        priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{apply_delta, PredictionInfo};

    fn config() -> GameConfig {
        GameConfig {
            mice_per_round: 2,
            round_duration_secs: 1,
            ending_duration_secs: 1,
            ..GameConfig::default()
        }
    }

    fn game() -> GameInstance {
        GameInstance::with_seed(config(), 0, 7)
    }

    fn predictive(input: PlayerInput, expected: PredictionPayload) -> PredictiveInput {
        PredictiveInput {
            player_id: "p1".to_string(),
            input,
            prediction: PredictionInfo {
                prediction_id: "p1-1".to_string(),
                expected_outcome: expected,
                confidence: 0.85,
            },
        }
    }

    #[test]
    fn test_new_game_waits() {
        let mut game = game();
        assert_eq!(game.phase(), GamePhase::Waiting);
        assert_eq!(game.sequence(), 0);
        assert_eq!(game.pending_updates(), StateUpdate::UpToDate);
    }

    #[test]
    fn test_add_player_centers_cursor() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 1).unwrap();
        let player = game.state().player("p1").unwrap();
        assert_eq!(player.position, Position::new(400.0, 300.0));
        assert!(game.add_player("p1", "Alice", "red", 2).is_err());
        assert_eq!(game.sequence(), 1);
    }

    #[test]
    fn test_round_starts_with_min_players() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();

        assert_eq!(game.tick(0.02, 10), Some(GamePhase::Active));
        let entities = game.state().entities();
        let goals = entities.values().filter(|e| e.kind == EntityKind::Goal).count();
        let mice = entities.values().filter(|e| e.kind == EntityKind::Mouse).count();
        assert_eq!(goals, 1);
        assert_eq!(mice, 2);
        assert!(entities.values().all(|e| game.state().bounds().contains(&e.position)));
    }

    #[test]
    fn test_round_lifecycle() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        game.tick(0.02, 0);
        assert_eq!(game.tick(0.02, 500), None);
        assert_eq!(game.tick(0.02, 1_000), Some(GamePhase::Ending));
        assert_eq!(game.tick(0.02, 1_500), None);

        let before = game.sequence();
        assert_eq!(game.tick(0.02, 2_000), Some(GamePhase::Waiting));
        assert!(game.sequence() > before);
        assert!(game.state().entities().is_empty());
        assert_eq!(game.state().player("p1").unwrap().score, 0);
    }

    #[test]
    fn test_apply_move_input() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        let input = PlayerInput::movement(5, 1, Position::new(10.0, 20.0));

        let outcome = game.apply_input("p1", &input, 5).unwrap();
        assert_eq!(outcome.base_sequence, 1);
        assert_eq!(outcome.state_sequence, 2);
        assert_eq!(outcome.actual, PredictionPayload::Position(Position::new(10.0, 20.0)));
        assert_eq!(game.state().player("p1").unwrap().position, Position::new(10.0, 20.0));
    }

    #[test]
    fn test_arrow_requires_active_round() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        let input = PlayerInput::arrow(5, 1, Position::new(10.0, 20.0), Direction::Left);
        assert_eq!(
            game.apply_input("p1", &input, 5),
            Err(StateError::PhaseLocked(GamePhase::Waiting))
        );

        game.tick(0.02, 6);
        let outcome = game.apply_input("p1", &input, 7).unwrap();
        assert_eq!(outcome.entity_id, "p1-arrow-1");
        assert!(game.state().entity("p1-arrow-1").is_some());
    }

    #[test]
    fn test_actions() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();

        let away = PlayerInput::action(1, 1, "away");
        let outcome = game.apply_input("p1", &away, 1).unwrap();
        assert_eq!(outcome.actual, PredictionPayload::Value(serde_json::json!("DISCONNECTED")));

        let dance = PlayerInput::action(2, 2, "dance");
        let sequence = game.sequence();
        assert!(game.apply_input("p1", &dance, 2).is_err());
        assert_eq!(game.sequence(), sequence);
    }

    #[test]
    fn test_pending_updates_chain_deltas() {
        let mut game = game();
        let base = game.state().clone();
        game.add_player("p1", "Alice", "red", 1).unwrap();
        game.apply_input("p1", &PlayerInput::movement(2, 1, Position::new(5.0, 5.0)), 2)
            .unwrap();

        let StateUpdate::Deltas(deltas) = game.pending_updates() else {
            panic!("expected deltas");
        };
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].base_sequence, 0);
        assert_eq!(deltas[1].base_sequence, 1);

        let rebuilt = deltas
            .iter()
            .try_fold(base, |state, delta| apply_delta(&state, delta))
            .unwrap();
        assert_eq!(rebuilt.player("p1"), game.state().player("p1"));
        assert_eq!(rebuilt.sequence(), game.sequence());
        assert_eq!(game.pending_updates(), StateUpdate::UpToDate);
    }

    #[test]
    fn test_pending_updates_falls_back_to_full_state() {
        let mut game = game();
        for i in 0..12 {
            game.add_player(&format!("p{}", i), "Player", "red", i).unwrap();
        }
        match game.pending_updates() {
            StateUpdate::Full(state) => assert_eq!(state.sequence(), 12),
            other => panic!("expected full state, got {:?}", other),
        }
    }

    #[test]
    fn test_mouse_captured_by_goal() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        game.tick(0.02, 0);

        let goal = game.state().entity("goal-p1").unwrap().position;
        let mouse = Entity::new("m-test", EntityKind::Mouse, goal).with_velocity(Velocity::new(0.0, 80.0));
        game.state.add_entity(mouse, 1).unwrap();

        game.tick(0.02, 2);
        assert_eq!(game.state().entity("m-test").unwrap().status, EntityStatus::Captured);
        assert!(game.state().player("p1").unwrap().score >= 1);
    }

    #[test]
    fn test_mouse_follows_arrow_and_bounces() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        game.tick(0.02, 0);
        game.state.remove_entity("goal-p1", 1).unwrap();

        let arrow = PlayerInput::arrow(1, 1, Position::new(100.0, 100.0), Direction::Right);
        game.apply_input("p1", &arrow, 1).unwrap();
        let follower = Entity::new("m-arrow", EntityKind::Mouse, Position::new(100.0, 100.0))
            .with_velocity(Velocity::new(0.0, -80.0));
        let edge = Entity::new("m-edge", EntityKind::Mouse, Position::new(800.0, 300.0))
            .with_direction(Direction::Right)
            .with_velocity(Velocity::new(80.0, 0.0));
        game.state.add_entity(follower, 2).unwrap();
        game.state.add_entity(edge, 2).unwrap();

        game.tick(0.02, 3);
        assert_eq!(game.state().entity("m-arrow").unwrap().direction, Direction::Right);
        assert_eq!(game.state().entity("m-edge").unwrap().direction, Direction::Left);
    }

    #[test]
    fn test_remove_player_removes_goal() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        game.tick(0.02, 0);
        game.remove_player("p1", 1).unwrap();
        assert!(game.state().entity("goal-p1").is_none());
        assert_eq!(game.player_count(), 0);
    }

    #[test]
    fn test_correction_only_when_prediction_misses() {
        let mut game = game();
        game.add_player("p1", "Alice", "red", 0).unwrap();
        let input = PlayerInput::movement(1, 1, Position::new(10.0, 10.0));
        let outcome = game.apply_input("p1", &input, 1).unwrap();

        let good = predictive(input.clone(), PredictionPayload::Position(Position::new(10.0, 10.5)));
        assert!(correction_for(&good, &outcome, "c1".to_string()).is_none());

        let bad = predictive(input, PredictionPayload::Position(Position::new(30.0, 10.0)));
        let correction = correction_for(&bad, &outcome, "c2".to_string()).unwrap();
        assert!(correction.validate().is_ok());
        assert_eq!(correction.priority, CorrectionPriority::High);
        assert_eq!(correction.rollback_to_sequence, outcome.base_sequence);
        assert_eq!(correction.replay_inputs.len(), 1);
        assert_eq!(correction.corrections[0].smoothing_duration, 50.0);
    }

    #[test]
    fn test_snapshot_history_is_bounded() {
        let mut game = game();
        for i in 0..20 {
            game.add_player(&format!("p{}", i), "Player", "red", i).unwrap();
        }
        assert!(game.snapshot_at(20).is_some());
        assert!(game.snapshot_at(5).is_none());
    }
}
