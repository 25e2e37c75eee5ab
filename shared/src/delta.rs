//! Delta compression between consecutive authoritative snapshots.
//!
//! `compute_delta` is a pure function of two snapshots: it reports the
//! field-level changes of players and entities, arrows that appeared, and ids
//! that disappeared. `apply_delta` is its inverse and is what the client uses
//! to advance its copy of the authoritative state.

use crate::state::{
    Arrow, AuthoritativeState, Entity, EntityKind, EntityStatus, GamePhase, Player, PlayerStatus,
};
use crate::{next_sequence, DeltaError, Direction, Position, Velocity};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Number of compression samples kept for trend detection.
pub const COMPRESSION_HISTORY: usize = 100;

/// Half-window mean difference below which the trend counts as stable.
const TREND_EPSILON: f32 = 0.05;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDelta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlayerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrows: Option<Vec<Arrow>>,
}

impl PlayerDelta {
    fn full(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: Some(player.name.clone()),
            position: Some(player.position),
            score: Some(player.score),
            status: Some(player.status),
            color: Some(player.color.clone()),
            arrows: Some(player.arrows.clone()),
        }
    }

    fn between(old: &Player, new: &Player) -> Option<Self> {
        let delta = Self {
            id: new.id.clone(),
            name: None,
            position: (old.position != new.position).then_some(new.position),
            score: (old.score != new.score).then_some(new.score),
            status: (old.status != new.status).then_some(new.status),
            color: (old.color != new.color).then(|| new.color.clone()),
            arrows: (old.arrows != new.arrows).then(|| new.arrows.clone()),
        };
        delta.has_changes().then_some(delta)
    }

    fn has_changes(&self) -> bool {
        self.position.is_some()
            || self.score.is_some()
            || self.status.is_some()
            || self.color.is_some()
            || self.arrows.is_some()
    }

    fn into_player(self) -> Result<Player, DeltaError> {
        match self {
            PlayerDelta {
                id,
                name: Some(name),
                position: Some(position),
                score: Some(score),
                status: Some(status),
                color: Some(color),
                arrows,
            } => Ok(Player {
                id,
                name,
                color,
                score,
                status,
                position,
                arrows: arrows.unwrap_or_default(),
            }),
            incomplete => Err(DeltaError::IncompleteEntry(incomplete.id)),
        }
    }

    fn patch(self, player: &mut Player) {
        if let Some(position) = self.position {
            player.position = position;
        }
        if let Some(score) = self.score {
            player.score = score;
        }
        if let Some(status) = self.status {
            player.status = status;
        }
        if let Some(color) = self.color {
            player.color = color;
        }
        if let Some(arrows) = self.arrows {
            player.arrows = arrows;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDelta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Velocity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,
}

impl EntityDelta {
    fn full(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            kind: Some(entity.kind),
            owner_id: entity.owner_id.clone(),
            position: Some(entity.position),
            direction: Some(entity.direction),
            velocity: Some(entity.velocity),
            status: Some(entity.status),
        }
    }

    fn between(old: &Entity, new: &Entity) -> Option<Self> {
        let delta = Self {
            id: new.id.clone(),
            kind: None,
            owner_id: None,
            position: (old.position != new.position).then_some(new.position),
            direction: (old.direction != new.direction).then_some(new.direction),
            velocity: (old.velocity != new.velocity).then_some(new.velocity),
            status: (old.status != new.status).then_some(new.status),
        };
        let changed = delta.position.is_some()
            || delta.direction.is_some()
            || delta.velocity.is_some()
            || delta.status.is_some();
        changed.then_some(delta)
    }

    fn into_entity(self) -> Result<Entity, DeltaError> {
        match self {
            EntityDelta {
                id,
                kind: Some(kind),
                owner_id,
                position: Some(position),
                direction: Some(direction),
                velocity: Some(velocity),
                status: Some(status),
            } => Ok(Entity {
                id,
                kind,
                position,
                direction,
                velocity,
                status,
                owner_id,
            }),
            incomplete => Err(DeltaError::IncompleteEntry(incomplete.id)),
        }
    }

    fn patch(self, entity: &mut Entity) {
        if let Some(position) = self.position {
            entity.position = position;
        }
        if let Some(direction) = self.direction {
            entity.direction = direction;
        }
        if let Some(velocity) = self.velocity {
            entity.velocity = velocity;
        }
        if let Some(status) = self.status {
            entity.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaState {
    pub base_sequence: u32,
    pub delta_sequence: u32,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<GamePhase>,
    #[serde(default)]
    pub changed_players: Vec<PlayerDelta>,
    #[serde(default)]
    pub changed_entities: Vec<EntityDelta>,
    #[serde(default)]
    pub new_arrows: Vec<Arrow>,
    #[serde(default)]
    pub removed_entity_ids: Vec<String>,
    #[serde(default)]
    pub removed_player_ids: Vec<String>,
    /// Checksum of the snapshot this delta produces.
    pub checksum: u64,
    pub compression_ratio: f32,
}

impl DeltaState {
    /// True when `delta_sequence` directly follows `base_sequence`,
    /// including the `u32::MAX -> 0` rollover.
    pub fn is_sequential(&self) -> bool {
        self.delta_sequence == next_sequence(self.base_sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_none()
            && self.changed_players.is_empty()
            && self.changed_entities.is_empty()
            && self.new_arrows.is_empty()
            && self.removed_entity_ids.is_empty()
            && self.removed_player_ids.is_empty()
    }
}

/// Computes the field-level difference from `prev` to `curr`.
pub fn compute_delta(prev: &AuthoritativeState, curr: &AuthoritativeState) -> DeltaState {
    let changed_players = curr
        .players()
        .values()
        .filter_map(|player| match prev.player(&player.id) {
            Some(old) => PlayerDelta::between(old, player),
            None => Some(PlayerDelta::full(player)),
        })
        .collect();

    let changed_entities = curr
        .entities()
        .values()
        .filter_map(|entity| match prev.entity(&entity.id) {
            Some(old) => EntityDelta::between(old, entity),
            None => Some(EntityDelta::full(entity)),
        })
        .collect();

    let known_arrows: HashSet<&str> = prev
        .players()
        .values()
        .flat_map(|player| player.arrows.iter().map(|arrow| arrow.id.as_str()))
        .collect();
    let new_arrows = curr
        .players()
        .values()
        .flat_map(|player| player.arrows.iter())
        .filter(|arrow| !known_arrows.contains(arrow.id.as_str()))
        .cloned()
        .collect();

    let removed_entity_ids = prev
        .entities()
        .keys()
        .filter(|id| curr.entity(id).is_none())
        .cloned()
        .collect();
    let removed_player_ids = prev
        .players()
        .keys()
        .filter(|id| curr.player(id).is_none())
        .cloned()
        .collect();

    let mut delta = DeltaState {
        base_sequence: prev.sequence(),
        delta_sequence: next_sequence(prev.sequence()),
        timestamp: curr.timestamp(),
        phase: (prev.phase() != curr.phase()).then_some(curr.phase()),
        changed_players,
        changed_entities,
        new_arrows,
        removed_entity_ids,
        removed_player_ids,
        checksum: curr.checksum(),
        compression_ratio: 0.0,
    };
    delta.compression_ratio = compression_ratio(&delta, curr);
    delta
}

/// `1 - size(delta) / size(full snapshot)` on the compact encoding, clamped
/// to [0, 1].
pub fn compression_ratio(delta: &DeltaState, full: &AuthoritativeState) -> f32 {
    let (Ok(delta_size), Ok(full_size)) = (
        bincode::serialized_size(delta),
        bincode::serialized_size(full),
    ) else {
        return 0.0;
    };
    if full_size == 0 {
        return 0.0;
    }
    (1.0 - delta_size as f32 / full_size as f32).clamp(0.0, 1.0)
}

/// Folds `delta` into `base`, producing the snapshot at `delta.delta_sequence`.
pub fn apply_delta(
    base: &AuthoritativeState,
    delta: &DeltaState,
) -> Result<AuthoritativeState, DeltaError> {
    if delta.base_sequence != base.sequence() {
        return Err(DeltaError::BaseMismatch {
            expected: base.sequence(),
            found: delta.base_sequence,
        });
    }

    let mut next = base.clone();
    for id in &delta.removed_player_ids {
        next.players.remove(id);
    }
    for id in &delta.removed_entity_ids {
        next.entities.remove(id);
    }

    for change in &delta.changed_players {
        match next.players.get_mut(&change.id) {
            Some(player) => change.clone().patch(player),
            None => {
                let player = change.clone().into_player()?;
                next.players.insert(player.id.clone(), player);
            }
        }
    }
    for change in &delta.changed_entities {
        match next.entities.get_mut(&change.id) {
            Some(entity) => change.clone().patch(entity),
            None => {
                let entity = change.clone().into_entity()?;
                next.entities.insert(entity.id.clone(), entity);
            }
        }
    }

    for arrow in &delta.new_arrows {
        if let Some(owner) = next.players.get_mut(&arrow.owner_id) {
            if !owner.arrows.iter().any(|known| known.id == arrow.id) {
                owner.arrows.push(arrow.clone());
            }
        }
    }

    if let Some(phase) = delta.phase {
        next.phase = phase;
    }
    next.sequence = delta.delta_sequence;
    next.timestamp = delta.timestamp;
    next.refresh_counts();
    next.checksum = next.compute_checksum();
    Ok(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionTrend {
    Improving,
    Stable,
    Declining,
}

/// Bounded history of compression ratios.
#[derive(Debug, Clone)]
pub struct CompressionTracker {
    history: VecDeque<f32>,
    capacity: usize,
}

impl Default for CompressionTracker {
    fn default() -> Self {
        Self::new(COMPRESSION_HISTORY)
    }
}

impl CompressionTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record_metrics(&mut self, delta: &DeltaState) {
        self.record_ratio(delta.compression_ratio);
    }

    pub fn record_ratio(&mut self, ratio: f32) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(ratio.clamp(0.0, 1.0));
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn average(&self) -> Option<f32> {
        mean(self.history.iter().copied())
    }

    /// Compares the mean of the older half of the window with the newer half.
    pub fn trend(&self) -> CompressionTrend {
        if self.history.len() < 2 {
            return CompressionTrend::Stable;
        }
        let half = self.history.len() / 2;
        let older = mean(self.history.iter().take(half).copied()).unwrap_or(0.0);
        let newer = mean(self.history.iter().skip(half).copied()).unwrap_or(0.0);

        if newer - older > TREND_EPSILON {
            CompressionTrend::Improving
        } else if older - newer > TREND_EPSILON {
            CompressionTrend::Declining
        } else {
            CompressionTrend::Stable
        }
    }
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f32)
}
