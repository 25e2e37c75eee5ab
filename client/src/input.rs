//! Synthetic player input for the headless client.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{AuthoritativeState, BoardBounds, Direction, GamePhase, Position};

/// Largest cursor step between two generated moves, in pixels.
const MAX_STEP: f32 = 40.0;

#[derive(Debug, Clone, PartialEq)]
pub enum BotInput {
    Move(Position),
    PlaceArrow(Position, Direction),
    Action(&'static str),
}

/// Random-walk cursor bot. Places arrows only while a round is running and
/// occasionally toggles between ready and away.
pub struct InputGenerator {
    rng: StdRng,
    cursor: Position,
    away: bool,
}

impl InputGenerator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        let bounds = BoardBounds::default();
        Self {
            rng,
            cursor: Position::new(bounds.width / 2.0, bounds.height / 2.0),
            away: false,
        }
    }

    /// Picks the next input given the bot's latest view of the game.
    pub fn next_input(&mut self, view: Option<&AuthoritativeState>) -> BotInput {
        let bounds = view.map(|state| *state.bounds()).unwrap_or_default();
        let roll: f32 = self.rng.gen();
        if roll < 0.02 || self.away {
            self.away = !self.away;
            return BotInput::Action(if self.away { "away" } else { "ready" });
        }

        let round_active = view.is_some_and(|state| state.phase() == GamePhase::Active);
        if round_active && roll < 0.25 {
            let position = Position::new(
                self.rng.gen_range(0.0..=bounds.width),
                self.rng.gen_range(0.0..=bounds.height),
            );
            let direction = match self.rng.gen_range(0..4) {
                0 => Direction::Up,
                1 => Direction::Down,
                2 => Direction::Left,
                _ => Direction::Right,
            };
            return BotInput::PlaceArrow(position, direction);
        }

        let step = Position::new(
            self.rng.gen_range(-MAX_STEP..=MAX_STEP),
            self.rng.gen_range(-MAX_STEP..=MAX_STEP),
        );
        self.cursor = bounds.clamp(Position::new(self.cursor.x + step.x, self.cursor.y + step.y));
        BotInput::Move(self.cursor)
    }
}

impl Default for InputGenerator {
    fn default() -> Self {
        Self::new()
    }
}
