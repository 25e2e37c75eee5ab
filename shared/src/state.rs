//! Authoritative game state.
//!
//! The server owns exactly one `AuthoritativeState` per game instance. Every
//! accepted mutation validates first and only then touches the state, bumps
//! the sequence and refreshes the checksum, so a rejected call is never
//! partially visible.

use crate::{
    next_sequence, Direction, Position, StateError, Velocity, BOARD_HEIGHT, BOARD_WIDTH,
    MAX_ARROWS_PER_PLAYER, MAX_NAME_LENGTH, MAX_PLAYERS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    Waiting,
    Active,
    Ending,
}

impl GamePhase {
    /// Fixed transition table: WAITING -> ACTIVE -> ENDING -> WAITING.
    pub fn can_transition_to(self, next: GamePhase) -> bool {
        matches!(
            (self, next),
            (GamePhase::Waiting, GamePhase::Active)
                | (GamePhase::Active, GamePhase::Ending)
                | (GamePhase::Ending, GamePhase::Waiting)
        )
    }

    fn code(self) -> u8 {
        match self {
            GamePhase::Waiting => 0,
            GamePhase::Active => 1,
            GamePhase::Ending => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Mouse,
    Cat,
    Wall,
    Goal,
    Arrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    Active,
    Captured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrow {
    pub id: String,
    pub owner_id: String,
    pub position: Position,
    pub direction: Direction,
    pub placed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub color: String,
    pub score: u32,
    pub status: PlayerStatus,
    /// Cursor position on the board.
    pub position: Position,
    pub arrows: Vec<Arrow>,
}

impl Player {
    pub fn new(id: &str, name: &str, color: &str, position: Position) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            score: 0,
            status: PlayerStatus::Active,
            position,
            arrows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub position: Position,
    pub direction: Direction,
    pub velocity: Velocity,
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl Entity {
    pub fn new(id: &str, kind: EntityKind, position: Position) -> Self {
        Self {
            id: id.to_string(),
            kind,
            position,
            direction: Direction::default(),
            velocity: Velocity::default(),
            status: EntityStatus::Active,
            owner_id: None,
        }
    }

    pub fn with_velocity(mut self, velocity: Velocity) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.owner_id = Some(owner_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardBounds {
    pub width: f32,
    pub height: f32,
}

impl Default for BoardBounds {
    fn default() -> Self {
        Self {
            width: BOARD_WIDTH,
            height: BOARD_HEIGHT,
        }
    }
}

impl BoardBounds {
    pub fn contains(&self, position: &Position) -> bool {
        position.is_finite()
            && (0.0..=self.width).contains(&position.x)
            && (0.0..=self.height).contains(&position.y)
    }

    pub fn clamp(&self, position: Position) -> Position {
        Position {
            x: position.x.clamp(0.0, self.width),
            y: position.y.clamp(0.0, self.height),
        }
    }

    fn check(&self, position: &Position) -> Result<(), StateError> {
        if self.contains(position) {
            Ok(())
        } else {
            Err(StateError::OutOfBounds {
                x: position.x,
                y: position.y,
                width: self.width,
                height: self.height,
            })
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub tick_rate: f32,
    pub last_tick_ms: f32,
    pub player_count: usize,
    pub entity_count: usize,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeState {
    pub(crate) sequence: u32,
    pub(crate) timestamp: u64,
    pub(crate) phase: GamePhase,
    pub(crate) players: BTreeMap<String, Player>,
    pub(crate) entities: BTreeMap<String, Entity>,
    pub(crate) bounds: BoardBounds,
    pub(crate) performance: PerformanceSnapshot,
    pub(crate) started_at: Option<u64>,
    pub(crate) ended_at: Option<u64>,
    pub(crate) checksum: u64,
}

impl AuthoritativeState {
    pub fn new(bounds: BoardBounds, now: u64) -> Self {
        let mut state = Self {
            sequence: 0,
            timestamp: now,
            phase: GamePhase::Waiting,
            players: BTreeMap::new(),
            entities: BTreeMap::new(),
            bounds,
            performance: PerformanceSnapshot::default(),
            started_at: None,
            ended_at: None,
            checksum: 0,
        };
        state.checksum = state.compute_checksum();
        state
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn bounds(&self) -> &BoardBounds {
        &self.bounds
    }

    pub fn players(&self) -> &BTreeMap<String, Player> {
        &self.players
    }

    pub fn entities(&self) -> &BTreeMap<String, Entity> {
        &self.entities
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn performance(&self) -> &PerformanceSnapshot {
        &self.performance
    }

    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<u64> {
        self.ended_at
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// FNV-1a over {sequence, phase, player count, entity count, timestamp}.
    /// Only meant for cheap equality and staleness checks.
    pub fn compute_checksum(&self) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        };
        feed(&self.sequence.to_le_bytes());
        feed(&[self.phase.code()]);
        feed(&(self.players.len() as u64).to_le_bytes());
        feed(&(self.entities.len() as u64).to_le_bytes());
        feed(&self.timestamp.to_le_bytes());
        hash
    }

    /// Moves to `next` if the transition table allows it. Returns false and
    /// leaves the state untouched otherwise.
    pub fn apply_phase_transition(&mut self, next: GamePhase, now: u64) -> bool {
        if !self.phase.can_transition_to(next) {
            return false;
        }

        self.phase = next;
        match next {
            GamePhase::Active => self.started_at = Some(now),
            GamePhase::Ending => self.ended_at = Some(now),
            GamePhase::Waiting => self.ended_at = None,
        }
        self.commit(now);
        true
    }

    pub fn add_player(&mut self, player: Player, now: u64) -> Result<(), StateError> {
        if self.players.contains_key(&player.id) {
            return Err(StateError::DuplicatePlayer(player.id));
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(StateError::TooManyPlayers(MAX_PLAYERS));
        }
        self.validate_player(&player)?;

        self.players.insert(player.id.clone(), player);
        self.commit(now);
        Ok(())
    }

    /// Removes a player together with the arrows they own on the board.
    pub fn remove_player(&mut self, id: &str, now: u64) -> Result<Player, StateError> {
        let player = self
            .players
            .remove(id)
            .ok_or_else(|| StateError::UnknownPlayer(id.to_string()))?;

        for arrow in &player.arrows {
            self.entities.remove(&arrow.id);
        }
        self.commit(now);
        Ok(player)
    }

    pub fn add_entity(&mut self, entity: Entity, now: u64) -> Result<(), StateError> {
        if self.entities.contains_key(&entity.id) {
            return Err(StateError::DuplicateEntity(entity.id));
        }
        self.validate_entity(&entity)?;

        self.entities.insert(entity.id.clone(), entity);
        self.commit(now);
        Ok(())
    }

    pub fn remove_entity(&mut self, id: &str, now: u64) -> Result<Entity, StateError> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| StateError::UnknownEntity(id.to_string()))?;

        if entity.kind == EntityKind::Arrow {
            if let Some(owner) = entity
                .owner_id
                .as_deref()
                .and_then(|owner| self.players.get_mut(owner))
            {
                owner.arrows.retain(|arrow| arrow.id != entity.id);
            }
        }
        self.commit(now);
        Ok(entity)
    }

    /// Places an arrow for `player_id`, evicting their oldest arrow when the
    /// per-player cap is reached. Returns the id of the evicted arrow.
    pub fn place_arrow(
        &mut self,
        player_id: &str,
        arrow_id: &str,
        position: Position,
        direction: Direction,
        now: u64,
    ) -> Result<Option<String>, StateError> {
        if self.phase != GamePhase::Active {
            return Err(StateError::PhaseLocked(self.phase));
        }
        if arrow_id.is_empty() {
            return Err(StateError::InvalidField {
                field: "arrow id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.entities.contains_key(arrow_id) {
            return Err(StateError::DuplicateEntity(arrow_id.to_string()));
        }
        self.bounds.check(&position)?;
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| StateError::UnknownPlayer(player_id.to_string()))?;

        let evicted = if player.arrows.len() >= MAX_ARROWS_PER_PLAYER {
            Some(player.arrows.remove(0).id)
        } else {
            None
        };
        player.arrows.push(Arrow {
            id: arrow_id.to_string(),
            owner_id: player_id.to_string(),
            position,
            direction,
            placed_at: now,
        });

        if let Some(evicted_id) = &evicted {
            self.entities.remove(evicted_id);
        }
        let entity = Entity::new(arrow_id, EntityKind::Arrow, position)
            .with_direction(direction)
            .with_owner(player_id);
        self.entities.insert(arrow_id.to_string(), entity);

        self.commit(now);
        Ok(evicted)
    }

    pub fn move_cursor(
        &mut self,
        player_id: &str,
        position: Position,
        now: u64,
    ) -> Result<(), StateError> {
        self.bounds.check(&position)?;
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| StateError::UnknownPlayer(player_id.to_string()))?;

        player.position = position;
        self.commit(now);
        Ok(())
    }

    pub fn set_player_score(
        &mut self,
        player_id: &str,
        score: u32,
        now: u64,
    ) -> Result<(), StateError> {
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| StateError::UnknownPlayer(player_id.to_string()))?;

        player.score = score;
        self.commit(now);
        Ok(())
    }

    pub fn set_player_status(
        &mut self,
        player_id: &str,
        status: PlayerStatus,
        now: u64,
    ) -> Result<(), StateError> {
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| StateError::UnknownPlayer(player_id.to_string()))?;

        player.status = status;
        self.commit(now);
        Ok(())
    }

    /// Changes heading and velocity of several entities as one mutation.
    /// An empty change set is a no-op and does not advance the sequence.
    pub fn redirect_entities(
        &mut self,
        changes: &[(String, Direction, Velocity)],
        now: u64,
    ) -> Result<(), StateError> {
        if changes.is_empty() {
            return Ok(());
        }
        for (id, _, velocity) in changes {
            if !self.entities.contains_key(id) {
                return Err(StateError::UnknownEntity(id.clone()));
            }
            if !velocity.is_finite() {
                return Err(StateError::InvalidField {
                    field: "entity velocity",
                    reason: "must be finite".to_string(),
                });
            }
        }

        for (id, direction, velocity) in changes {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.direction = *direction;
                entity.velocity = *velocity;
            }
        }
        self.commit(now);
        Ok(())
    }

    /// Marks an active entity as captured and stops it, crediting `scorer`
    /// with one point when given.
    pub fn capture_entity(
        &mut self,
        entity_id: &str,
        scorer: Option<&str>,
        now: u64,
    ) -> Result<(), StateError> {
        match self.entities.get(entity_id) {
            None => return Err(StateError::UnknownEntity(entity_id.to_string())),
            Some(entity) if entity.status == EntityStatus::Captured => {
                return Err(StateError::InvalidField {
                    field: "entity status",
                    reason: format!("{} is already captured", entity_id),
                })
            }
            Some(_) => {}
        }
        if let Some(scorer) = scorer {
            if !self.players.contains_key(scorer) {
                return Err(StateError::UnknownPlayer(scorer.to_string()));
            }
        }

        if let Some(entity) = self.entities.get_mut(entity_id) {
            entity.status = EntityStatus::Captured;
            entity.velocity = Velocity::default();
        }
        if let Some(player) = scorer.and_then(|id| self.players.get_mut(id)) {
            player.score = player.score.saturating_add(1);
        }
        self.commit(now);
        Ok(())
    }

    /// Advances the simulation by `delta_time` seconds. Entities only move
    /// while the round is ACTIVE; the sequence advances on every call.
    pub fn tick(&mut self, delta_time: f32, now: u64) {
        let delta_time = if delta_time.is_finite() {
            delta_time.max(0.0)
        } else {
            0.0
        };

        if self.phase == GamePhase::Active {
            let bounds = self.bounds;
            for entity in self.entities.values_mut() {
                if entity.status != EntityStatus::Active {
                    continue;
                }
                let moved = Position {
                    x: entity.position.x + entity.velocity.x * delta_time,
                    y: entity.position.y + entity.velocity.y * delta_time,
                };
                entity.position = bounds.clamp(moved);
            }
        }

        self.performance.tick_rate = if delta_time > 0.0 {
            1.0 / delta_time
        } else {
            0.0
        };
        self.performance.last_tick_ms = delta_time * 1000.0;
        self.commit(now);
    }

    /// Builds the state for the next round: players are carried over with
    /// scores and arrows reset, the board is cleared and the sequence keeps
    /// counting so it never goes backwards across rounds.
    pub fn next_round(&self, now: u64) -> AuthoritativeState {
        let mut next = AuthoritativeState::new(self.bounds, now);
        next.sequence = self.sequence;
        next.players = self
            .players
            .values()
            .map(|player| {
                let mut player = player.clone();
                player.score = 0;
                player.arrows.clear();
                (player.id.clone(), player)
            })
            .collect();
        next.commit(now);
        next
    }

    fn validate_player(&self, player: &Player) -> Result<(), StateError> {
        if player.id.is_empty() {
            return Err(StateError::InvalidField {
                field: "player id",
                reason: "must not be empty".to_string(),
            });
        }
        if player.name.is_empty() || player.name.chars().count() > MAX_NAME_LENGTH {
            return Err(StateError::InvalidField {
                field: "player name",
                reason: format!("must be 1-{} characters", MAX_NAME_LENGTH),
            });
        }
        if player.color.is_empty() {
            return Err(StateError::InvalidField {
                field: "player color",
                reason: "must not be empty".to_string(),
            });
        }
        if player.arrows.len() > MAX_ARROWS_PER_PLAYER {
            return Err(StateError::InvalidField {
                field: "player arrows",
                reason: format!("at most {} arrows", MAX_ARROWS_PER_PLAYER),
            });
        }
        self.bounds.check(&player.position)
    }

    fn validate_entity(&self, entity: &Entity) -> Result<(), StateError> {
        if entity.id.is_empty() {
            return Err(StateError::InvalidField {
                field: "entity id",
                reason: "must not be empty".to_string(),
            });
        }
        if !entity.velocity.is_finite() {
            return Err(StateError::InvalidField {
                field: "entity velocity",
                reason: "must be finite".to_string(),
            });
        }
        self.bounds.check(&entity.position)
    }

    pub(crate) fn refresh_counts(&mut self) {
        self.performance.player_count = self.players.len();
        self.performance.entity_count = self.entities.len();
    }

    fn commit(&mut self, now: u64) {
        self.sequence = next_sequence(self.sequence);
        self.timestamp = now;
        self.refresh_counts();
        self.performance.updated_at = now;
        self.checksum = self.compute_checksum();
    }
}
