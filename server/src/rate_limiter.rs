//! Per-player input rate limiting.
//!
//! Each player gets an independent pair of sliding windows: a long window
//! capping sustained input rate and a short burst window. Players never share
//! limiter state, and only admitted inputs count towards either window.

use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use log::debug;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct PlayerWindow {
    /// Admission times in ms, oldest first, all within the long window.
    admitted: VecDeque<u64>,
    rejected: u64,
}

impl PlayerWindow {
    fn prune(&mut self, now: u64, window_ms: u64) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_sub(oldest) >= window_ms {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_burst_window(&self, now: u64, burst_window_ms: u64) -> usize {
        self.admitted
            .iter()
            .rev()
            .take_while(|&&at| now.saturating_sub(at) < burst_window_ms)
            .count()
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    players: HashMap<String, PlayerWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            players: HashMap::new(),
        }
    }

    /// Admits one input for `player_id` at `now` (ms) or reports which cap
    /// it hit. A rejected input does not consume quota.
    pub fn check(&mut self, player_id: &str, now: u64) -> Result<(), RateLimitError> {
        let window = self.players.entry(player_id.to_string()).or_default();
        window.prune(now, self.config.window_ms);

        let verdict = if window.in_burst_window(now, self.config.burst_window_ms)
            >= self.config.burst_limit
        {
            Err(RateLimitError::BurstLimitExceeded)
        } else if window.admitted.len() >= self.config.max_per_second {
            Err(RateLimitError::RateLimitExceeded)
        } else {
            Ok(())
        };

        match verdict {
            Ok(()) => window.admitted.push_back(now),
            Err(err) => {
                window.rejected += 1;
                debug!("Dropping input from {}: {}", player_id, err.code());
            }
        }
        verdict
    }

    pub fn rejected_count(&self, player_id: &str) -> u64 {
        self.players
            .get(player_id)
            .map(|window| window.rejected)
            .unwrap_or(0)
    }

    pub fn remove_player(&mut self, player_id: &str) {
        self.players.remove(player_id);
    }

    pub fn tracked_players(&self) -> usize {
        self.players.len()
    }
}
